use thiserror::Error;

/// First structural failure observed while loading a class.
///
/// Decode failures short-circuit: the registry surfaces the kind raised by
/// the first bad record it encounters. The successful outcome is the `Ok`
/// arm of [`crate::runtime::ClassRegistry::load_class`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ClassLoadError {
    #[error("FileNotFound")]
    FileNotFound,
    #[error("InvalidMagicNumber")]
    InvalidMagicNumber,
    #[error("InvalidVersion")]
    InvalidVersion,
    #[error("InvalidConstantPool")]
    InvalidConstantPool,
    #[error("InvalidConstantPoolEntry")]
    InvalidConstantPoolEntry,
    #[error("InvalidThisClassEntry")]
    InvalidThisClassEntry,
    #[error("InvalidSuperClassEntry")]
    InvalidSuperClassEntry,
    #[error("InvalidFieldName")]
    InvalidFieldName,
    #[error("InvalidFieldDescriptor")]
    InvalidFieldDescriptor,
    #[error("InvalidAttributeName")]
    InvalidAttributeName,
    #[error("InvalidMethodName")]
    InvalidMethodName,
    #[error("InvalidMethodDescriptor")]
    InvalidMethodDescriptor,
    #[error("InvalidMethodRefClassName")]
    InvalidMethodRefClassName,
    #[error("InvalidMethodRefMethodDescriptor")]
    InvalidMethodRefMethodDescriptor,
}
