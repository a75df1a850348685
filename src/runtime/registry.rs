use std::collections::HashSet;
use std::ffi::CStr;
use std::os::raw::c_char;
use std::path::PathBuf;
use std::ptr;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use crate::bytes::ByteReader;
use crate::class::decoder;
use crate::class::ClassFile;
use crate::error::ClassLoadError;
use crate::runtime::materializer;
use crate::runtime::{Class, Field, Method};
use crate::{LCLASS_EXTENSION, LCLASS_MAGIC};

/// Owns every loaded class and the class-path search list.
///
/// Classes are loaded lazily by name, memoized and never evicted, so
/// references into the registry stay valid for its whole lifetime. The
/// registry is meant to be driven from one thread; `load_class` recurses
/// for super classes but is never re-entered concurrently.
///
/// Generated trampolines bake the registry's address into method code:
/// once a class with trampoline call sites has been loaded, the registry
/// must not move. Keep it in a `Box`, an `Arc` or a static.
#[derive(Debug, Default)]
pub struct ClassRegistry {
    class_paths: RwLock<Vec<PathBuf>>,
    classes: DashMap<String, Arc<Class>>,
    // names currently being loaded somewhere in the super-resolution
    // chain; rediscovery means a cycle
    loading: Mutex<HashSet<String>>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a directory to the search list. Duplicates are allowed;
    /// lookup follows insertion order.
    pub fn add_class_path(&self, class_path: impl Into<PathBuf>) {
        self.class_paths.write().push(class_path.into());
    }

    pub fn class_paths(&self) -> Vec<PathBuf> {
        self.class_paths.read().clone()
    }

    /// Registers a caller-constructed class. The first registration of a
    /// name wins; a duplicate returns `None`.
    pub fn new_class(&self, class: Class) -> Option<Arc<Class>> {
        match self.classes.entry(class.class_name.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(vacant) => {
                let class = Arc::new(class);
                vacant.insert(Arc::clone(&class));
                Some(class)
            }
        }
    }

    /// Lookup only, no loading.
    pub fn get_class(&self, class_name: &str) -> Option<Arc<Class>> {
        self.classes
            .get(class_name)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn loaded_classes(&self) -> Vec<Arc<Class>> {
        self.classes
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Returns the memoized class or finds `<class_path>/<name>.lclass`,
    /// decodes it, resolves its supers recursively, materializes its
    /// methods and inserts it. The first structural failure is returned
    /// as-is.
    pub fn load_class(&self, class_name: &str) -> Result<Arc<Class>, ClassLoadError> {
        if let Some(class) = self.get_class(class_name) {
            return Ok(class);
        }

        if !self.loading.lock().insert(class_name.to_string()) {
            // the super chain led back to a class still being loaded
            return Err(ClassLoadError::InvalidSuperClassEntry);
        }
        let result = self.load_class_file(class_name);
        self.loading.lock().remove(class_name);
        result
    }

    /// Like [`ClassRegistry::load_class`] but fatal on failure.
    pub fn load_class_error(&self, class_name: &str) -> Arc<Class> {
        match self.load_class(class_name) {
            Ok(class) => class,
            Err(status) => panic!("class '{class_name}' could not be loaded: '{status}'"),
        }
    }

    /// Loads the class if necessary and resolves a method by name.
    /// Fatal when the class or the method is missing.
    pub fn get_method_error(&self, class_name: &str, method_name: &str) -> &Method {
        let class = self.load_class_error(class_name);
        let method = class.get_method_error(method_name);
        // loaded classes are never evicted, so the method outlives the
        // borrow of the temporary Arc
        unsafe { &*(method as *const Method) }
    }

    /// Loads the class if necessary and resolves a method by descriptor.
    /// Fatal when the class or the method is missing.
    pub fn get_method_from_descriptor_error(
        &self,
        class_name: &str,
        method_descriptor: &str,
    ) -> &Method {
        let class = self.load_class_error(class_name);
        let method = class.get_method_from_descriptor_error(method_descriptor);
        unsafe { &*(method as *const Method) }
    }

    fn load_class_file(&self, class_name: &str) -> Result<Arc<Class>, ClassLoadError> {
        let Some(filename) = self.find_class(class_name) else {
            return Err(ClassLoadError::FileNotFound);
        };
        let mut reader =
            ByteReader::from_file(&filename).map_err(|_| ClassLoadError::FileNotFound)?;

        if reader.read_u32() != LCLASS_MAGIC {
            return Err(ClassLoadError::InvalidMagicNumber);
        }
        let class_file = match reader.read_u16() {
            1 => decoder::decode_v1(&mut reader)?,
            _ => return Err(ClassLoadError::InvalidVersion),
        };

        let class = self.link_class(class_file)?;
        // the first insertion of a name wins
        let entry = self
            .classes
            .entry(class.class_name.to_string())
            .or_insert(class);
        Ok(Arc::clone(entry.value()))
    }

    /// Resolves supers through the registry and turns the decoded draft
    /// into a loaded class with materialized method code.
    fn link_class(&self, class_file: ClassFile) -> Result<Arc<Class>, ClassLoadError> {
        let mut supers = Vec::with_capacity(class_file.supers.len());
        for super_name in &class_file.supers {
            supers.push(self.load_class(super_name)?);
        }

        let fields = class_file
            .fields
            .into_iter()
            .map(|field| Field {
                name: field.name,
                descriptor: field.descriptor,
                access_flags: field.access_flags,
            })
            .collect();

        let mut methods = Vec::with_capacity(class_file.methods.len());
        for entry in class_file.methods {
            let mut method = Method {
                name: entry.name,
                descriptor: entry.descriptor,
                access_flags: entry.access_flags,
                code_length: 0,
                code_ptr: ptr::null_mut(),
                allocated: false,
            };
            materializer::materialize_method(self, &mut method, entry.code, entry.method_refs);
            methods.push(method);
        }

        Ok(Arc::new(Class {
            class_name: Arc::from(class_file.name),
            access_flags: class_file.access_flags,
            supers,
            fields,
            methods,
        }))
    }

    fn find_class(&self, class_name: &str) -> Option<PathBuf> {
        for class_path in self.class_paths.read().iter() {
            let mut filename = class_path.join(class_name);
            filename.set_extension(LCLASS_EXTENSION);
            if filename.exists() {
                return Some(filename);
            }
        }
        None
    }
}

/// Runtime lookup entry point for generated trampolines.
///
/// Microsoft x64 convention so the emitted call sites are byte-identical
/// on every host. Loads the class if necessary; a missing class or
/// descriptor is fatal.
///
/// # Safety
///
/// `registry` must point to a live [`ClassRegistry`] and both strings
/// must be NUL-terminated; generated call sites pass the registry whose
/// address they were materialized against and pointers into their own
/// string table.
pub unsafe extern "win64" fn get_method_from_descriptor_error(
    registry: *const ClassRegistry,
    class_name: *const c_char,
    method_descriptor: *const c_char,
) -> *const Method {
    let registry = &*registry;
    let class_name = CStr::from_ptr(class_name).to_string_lossy();
    let method_descriptor = CStr::from_ptr(method_descriptor).to_string_lossy();
    registry.get_method_from_descriptor_error(&class_name, &method_descriptor) as *const Method
}
