//! Page-backed memory for method code.
//!
//! A region is allocated read-write, filled, then flipped to read-execute;
//! the same region moves between the two states and is never writable and
//! executable at once. Allocation and protection failures are fatal: they
//! come from the OS, not from class-file input.

#[cfg(unix)]
pub fn allocate_rw(len: usize) -> *mut u8 {
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_ANON | libc::MAP_PRIVATE,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        panic!("out of memory: mmap failed: {}", std::io::Error::last_os_error());
    }
    ptr as *mut u8
}

#[cfg(unix)]
pub fn make_executable(ptr: *mut u8, len: usize) {
    let rc = unsafe { libc::mprotect(ptr as *mut _, len, libc::PROT_READ | libc::PROT_EXEC) };
    if rc != 0 {
        panic!(
            "mprotect(PROT_READ|PROT_EXEC) failed: {}",
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(unix)]
pub fn make_writable(ptr: *mut u8, len: usize) {
    let rc = unsafe { libc::mprotect(ptr as *mut _, len, libc::PROT_READ | libc::PROT_WRITE) };
    if rc != 0 {
        panic!(
            "mprotect(PROT_READ|PROT_WRITE) failed: {}",
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(unix)]
pub fn free(ptr: *mut u8, len: usize) {
    let rc = unsafe { libc::munmap(ptr as *mut _, len) };
    if rc != 0 {
        panic!("munmap failed: {}", std::io::Error::last_os_error());
    }
}

#[cfg(windows)]
pub fn allocate_rw(len: usize) -> *mut u8 {
    use windows_sys::Win32::System::Memory::{
        VirtualAlloc, MEM_COMMIT, MEM_RESERVE, PAGE_READWRITE,
    };

    let ptr = unsafe {
        VirtualAlloc(std::ptr::null_mut(), len, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE)
            as *mut u8
    };
    if ptr.is_null() {
        panic!(
            "out of memory: VirtualAlloc failed: {}",
            std::io::Error::last_os_error()
        );
    }
    ptr
}

#[cfg(windows)]
pub fn make_executable(ptr: *mut u8, len: usize) {
    use windows_sys::Win32::System::Memory::{VirtualProtect, PAGE_EXECUTE_READ};

    let mut old = 0;
    let ok = unsafe { VirtualProtect(ptr as *mut _, len, PAGE_EXECUTE_READ, &mut old) };
    if ok == 0 {
        panic!(
            "VirtualProtect(PAGE_EXECUTE_READ) failed: {}",
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(windows)]
pub fn make_writable(ptr: *mut u8, len: usize) {
    use windows_sys::Win32::System::Memory::{VirtualProtect, PAGE_READWRITE};

    let mut old = 0;
    let ok = unsafe { VirtualProtect(ptr as *mut _, len, PAGE_READWRITE, &mut old) };
    if ok == 0 {
        panic!(
            "VirtualProtect(PAGE_READWRITE) failed: {}",
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(windows)]
pub fn free(ptr: *mut u8, _len: usize) {
    use windows_sys::Win32::System::Memory::{VirtualFree, MEM_RELEASE};

    let ok = unsafe { VirtualFree(ptr as *mut _, 0, MEM_RELEASE) };
    if ok == 0 {
        panic!("VirtualFree failed: {}", std::io::Error::last_os_error());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_survives_protection_flips() {
        let ptr = allocate_rw(64);
        unsafe {
            std::ptr::write_bytes(ptr, 0xC3, 64);
        }
        make_executable(ptr, 64);
        // still readable after sealing
        assert_eq!(unsafe { *ptr }, 0xC3);
        make_writable(ptr, 64);
        unsafe {
            *ptr = 0x90;
        }
        make_executable(ptr, 64);
        assert_eq!(unsafe { *ptr }, 0x90);
        free(ptr, 64);
    }
}
