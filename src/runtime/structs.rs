use std::mem;
use std::slice;
use std::sync::Arc;

use crate::flags::AccessFlags;
use crate::runtime::exec;

/// Signature of every invokable method body: up to three integer
/// arguments in rcx/rdx/r8, result in rax, Microsoft x64 convention on
/// all platforms. Call sites with more than three register arguments are
/// not supported.
pub type NativeFn = unsafe extern "win64" fn(u64, u64, u64) -> u64;

/// A loaded class. Supers are shared handles into the registry, which
/// never evicts, so they stay valid for the registry's lifetime.
#[derive(Debug)]
pub struct Class {
    pub(crate) class_name: Arc<str>,
    pub(crate) access_flags: AccessFlags,
    pub(crate) supers: Vec<Arc<Class>>,
    pub(crate) fields: Vec<Field>,
    pub(crate) methods: Vec<Method>,
}

impl Class {
    /// An empty public class, to be filled in and handed to
    /// [`crate::runtime::ClassRegistry::new_class`].
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            class_name: name.into(),
            access_flags: AccessFlags::PUBLIC,
            supers: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.class_name
    }

    pub fn access_flags(&self) -> AccessFlags {
        self.access_flags
    }

    pub fn set_access_flags(&mut self, access_flags: AccessFlags) {
        self.access_flags = access_flags;
    }

    pub fn supers(&self) -> &[Arc<Class>] {
        &self.supers
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    pub fn add_field(&mut self, field: Field) {
        self.fields.push(field);
    }

    pub fn add_method(&mut self, method: Method) {
        self.methods.push(method);
    }

    pub fn get_method(&self, name: &str) -> Option<&Method> {
        self.methods.iter().find(|method| method.name == name)
    }

    /// Panics when no method carries `name`; missing methods on a loaded
    /// class are a linkage fault, not a recoverable condition.
    pub fn get_method_error(&self, name: &str) -> &Method {
        match self.get_method(name) {
            Some(method) => method,
            None => panic!("method name '{name}' not found in class '{}'", self.class_name),
        }
    }

    pub fn get_method_from_descriptor(&self, descriptor: &str) -> Option<&Method> {
        self.methods
            .iter()
            .find(|method| method.descriptor == descriptor)
    }

    pub fn get_method_from_descriptor_error(&self, descriptor: &str) -> &Method {
        match self.get_method_from_descriptor(descriptor) {
            Some(method) => method,
            None => panic!(
                "method descriptor '{descriptor}' not found in class '{}'",
                self.class_name
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Field {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) access_flags: AccessFlags,
}

impl Field {
    pub fn new(name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
            access_flags: AccessFlags::PUBLIC,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn access_flags(&self) -> AccessFlags {
        self.access_flags
    }
}

/// A method and its native code handle.
///
/// `code_ptr` either references an externally supplied function (not
/// owned) or a buffer from [`exec`] that this method owns and releases on
/// drop. An owned buffer is read-write only while the materializer patches
/// it and read-execute afterwards, never both writable and executable.
#[derive(Debug)]
pub struct Method {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) access_flags: AccessFlags,
    pub(crate) code_length: usize,
    pub(crate) code_ptr: *mut u8,
    pub(crate) allocated: bool,
}

// The raw code pointer is either external or exclusively owned by this
// method, and owned buffers are only written during materialization,
// before the method is shared.
unsafe impl Send for Method {}
unsafe impl Sync for Method {}

impl Method {
    pub fn new(name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
            access_flags: AccessFlags::PUBLIC,
            code_length: 0,
            code_ptr: std::ptr::null_mut(),
            allocated: false,
        }
    }

    /// A method backed by a host function instead of loaded code.
    pub fn native(
        name: impl Into<String>,
        descriptor: impl Into<String>,
        code: NativeFn,
    ) -> Self {
        let mut method = Self::new(name, descriptor);
        method.code_ptr = code as *mut u8;
        method
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn access_flags(&self) -> AccessFlags {
        self.access_flags
    }

    pub fn set_access_flags(&mut self, access_flags: AccessFlags) {
        self.access_flags = access_flags;
    }

    pub fn code_length(&self) -> usize {
        self.code_length
    }

    pub fn code_ptr(&self) -> *const u8 {
        self.code_ptr
    }

    pub fn is_invokable(&self) -> bool {
        !self.code_ptr.is_null()
    }

    /// The owned code buffer, for inspection and debug printing. `None`
    /// for external native methods.
    pub fn code_bytes(&self) -> Option<&[u8]> {
        if self.code_ptr.is_null() || self.code_length == 0 {
            return None;
        }
        Some(unsafe { slice::from_raw_parts(self.code_ptr, self.code_length) })
    }

    /// Copies `code` into a fresh read-write executable-capable buffer.
    /// Does nothing when the method already has code.
    pub(crate) fn allocate_code(&mut self, code: &[u8]) {
        if !self.code_ptr.is_null() {
            return;
        }
        self.allocated = true;
        self.code_length = code.len();
        self.code_ptr = exec::allocate_rw(self.code_length);
        unsafe {
            std::ptr::copy_nonoverlapping(code.as_ptr(), self.code_ptr, self.code_length);
        }
    }

    pub fn make_code_executable(&self) {
        exec::make_executable(self.code_ptr, self.code_length);
    }

    pub fn make_code_read_write(&self) {
        exec::make_writable(self.code_ptr, self.code_length);
    }

    /// Calls the method's code with up to three integer arguments.
    ///
    /// # Safety
    ///
    /// The method must be invokable and its code must be valid machine
    /// code for the [`NativeFn`] convention; the loader trusts code bytes
    /// beyond the call sites it patched.
    pub unsafe fn invoke(&self, arg0: u64, arg1: u64, arg2: u64) -> u64 {
        let code: NativeFn = mem::transmute(self.code_ptr);
        code(arg0, arg1, arg2)
    }
}

impl Drop for Method {
    fn drop(&mut self) {
        if self.allocated && !self.code_ptr.is_null() {
            exec::free(self.code_ptr, self.code_length);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_lookup_is_by_name_and_by_descriptor() {
        let mut class = Class::new("A");
        let mut method = Method::new("m", "P");
        method.set_access_flags(AccessFlags::PUBLIC | AccessFlags::STATIC);
        class.add_method(method);

        assert!(class.get_method("m").is_some());
        assert!(class.get_method("n").is_none());
        assert_eq!(class.get_method_from_descriptor("P").unwrap().name(), "m");
        assert!(class.get_method_from_descriptor("Q").is_none());
    }

    #[test]
    #[should_panic(expected = "not found")]
    fn missing_method_is_fatal() {
        let class = Class::new("A");
        class.get_method_error("nope");
    }

    #[test]
    fn empty_method_is_not_invokable() {
        let method = Method::new("m", "P");
        assert!(!method.is_invokable());
        assert!(method.code_bytes().is_none());
    }

    #[test]
    fn allocated_code_round_trips() {
        let mut method = Method::new("m", "P");
        method.allocate_code(&[0xC3]);
        assert!(method.is_invokable());
        assert_eq!(method.code_length(), 1);
        assert_eq!(method.code_bytes(), Some(&[0xC3][..]));
        // allocate_code is a no-op once code exists
        let ptr = method.code_ptr();
        method.allocate_code(&[0x90, 0x90]);
        assert_eq!(method.code_ptr(), ptr);
        assert_eq!(method.code_length(), 1);
    }
}
