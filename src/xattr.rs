/*!
 * Extended-attribute access through host syscalls
 *
 * All operations use the `l*xattr` family, so symlinks are never followed.
 * Reads are two-phase: a size query with a null buffer, then the actual
 * read into an allocation of that size.
 */

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr;

fn cpath(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))
}

fn cname(name: &str) -> io::Result<CString> {
    CString::new(name)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "attribute name contains NUL"))
}

/// Read the value of attribute `name` on `path` without following symlinks.
pub fn lgetxattr(path: &Path, name: &str) -> io::Result<Vec<u8>> {
    let path = cpath(path)?;
    let name = cname(name)?;
    loop {
        let size = unsafe { libc::lgetxattr(path.as_ptr(), name.as_ptr(), ptr::null_mut(), 0) };
        if size == -1 {
            return Err(io::Error::last_os_error());
        }
        let mut buf = vec![0u8; size as usize];
        let ret = unsafe {
            libc::lgetxattr(
                path.as_ptr(),
                name.as_ptr(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
            )
        };
        if ret == -1 {
            let err = io::Error::last_os_error();
            // value grew between the size query and the read
            if err.raw_os_error() == Some(libc::ERANGE) {
                continue;
            }
            return Err(err);
        }
        buf.truncate(ret as usize);
        return Ok(buf);
    }
}

/// List the attribute names present on `path` without following symlinks.
pub fn llistxattr(path: &Path) -> io::Result<Vec<String>> {
    let path = cpath(path)?;
    loop {
        let size = unsafe { libc::llistxattr(path.as_ptr(), ptr::null_mut(), 0) };
        if size == -1 {
            return Err(io::Error::last_os_error());
        }
        if size == 0 {
            return Ok(Vec::new());
        }
        let mut buf = vec![0u8; size as usize];
        let ret = unsafe {
            libc::llistxattr(path.as_ptr(), buf.as_mut_ptr() as *mut libc::c_char, buf.len())
        };
        if ret == -1 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ERANGE) {
                continue;
            }
            return Err(err);
        }
        buf.truncate(ret as usize);
        // the kernel hands back a NUL-separated name list
        return Ok(buf
            .split(|b| *b == 0)
            .filter(|s| !s.is_empty())
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .collect());
    }
}

/// Set attribute `name` on `path` to `value` without following symlinks.
pub fn lsetxattr(path: &Path, name: &str, value: &[u8]) -> io::Result<()> {
    let path = cpath(path)?;
    let name = cname(name)?;
    let ret = unsafe {
        libc::lsetxattr(
            path.as_ptr(),
            name.as_ptr(),
            value.as_ptr() as *const libc::c_void,
            value.len(),
            0,
        )
    };
    if ret == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Remove attribute `name` from `path` without following symlinks.
pub fn lremovexattr(path: &Path, name: &str) -> io::Result<()> {
    let path = cpath(path)?;
    let name = cname(name)?;
    let ret = unsafe { libc::lremovexattr(path.as_ptr(), name.as_ptr()) };
    if ret == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
