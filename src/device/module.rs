//! Compiled device backend modules
//!
//! Safe wrapper around libloading for binding the device callbacks exported
//! by a compiled pipeline backend.

use std::ffi::{c_void, CString};
use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};

use super::{DeviceCallbacks, DeviceError, DeviceFn, DeviceResult, DeviceSync};
use crate::config::DeviceConfig;
use crate::runtime::RawBuffer;

/// A loaded backend library and the callbacks resolved from it
pub struct DeviceModule {
    /// Path the library was loaded from
    path: PathBuf,
    /// Resolved callbacks; only valid while `library` is alive
    callbacks: DeviceCallbacks,
    /// Keeps the code behind `callbacks` mapped
    _library: Library,
}

impl std::fmt::Debug for DeviceModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceModule")
            .field("path", &self.path)
            .field("callbacks", &self.callbacks.bound_count())
            .finish()
    }
}

impl DeviceModule {
    /// Load a backend library and resolve its device callbacks.
    ///
    /// Symbols that the library does not export are left unbound; the
    /// matching buffer operations become no-ops.
    pub fn load(path: impl AsRef<Path>, config: &DeviceConfig) -> DeviceResult<Self> {
        let path = path.as_ref().to_path_buf();

        // Safety: loading a library runs its initializers. The caller vouches
        // for the backend it points us at.
        let library = unsafe {
            Library::new(&path).map_err(|e| DeviceError::Load {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?
        };

        let callbacks = DeviceCallbacks {
            copy_to_host: resolve(&library, &path, &config.copy_to_host_symbol)?,
            copy_to_device: resolve(&library, &path, &config.copy_to_device_symbol)?,
            free_device_buffer: resolve(&library, &path, &config.free_device_symbol)?,
        };

        tracing::debug!(
            path = %path.display(),
            bound = callbacks.bound_count(),
            "loaded device module"
        );

        Ok(Self {
            path,
            callbacks,
            _library: library,
        })
    }

    /// Locate and load the library named in `config.library`
    pub fn from_config(config: &DeviceConfig) -> DeviceResult<Self> {
        let path = find_library(config)?;
        Self::load(path, config)
    }

    /// Path the library was loaded from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of device callbacks the library exports
    pub fn bound_count(&self) -> usize {
        self.callbacks.bound_count()
    }
}

impl DeviceSync for DeviceModule {
    fn copy_to_host(&self, user_context: *mut c_void, buf: &mut RawBuffer) -> bool {
        self.callbacks.copy_to_host(user_context, buf)
    }

    fn copy_to_device(&self, user_context: *mut c_void, buf: &mut RawBuffer) -> bool {
        self.callbacks.copy_to_device(user_context, buf)
    }

    fn free_device_buffer(&self, user_context: *mut c_void, buf: &mut RawBuffer) -> bool {
        self.callbacks.free_device_buffer(user_context, buf)
    }
}

fn resolve(library: &Library, path: &Path, name: &str) -> DeviceResult<Option<DeviceFn>> {
    let c_name = CString::new(name).map_err(|_| DeviceError::InvalidSymbol(name.to_string()))?;

    // Safety: the symbol is assumed to have the DeviceFn signature; that is
    // the contract every backend exports.
    let symbol: Result<Symbol<DeviceFn>, _> = unsafe { library.get(c_name.as_bytes_with_nul()) };
    match symbol {
        Ok(symbol) => Ok(Some(*symbol)),
        Err(e) => {
            tracing::debug!(symbol = name, path = %path.display(), error = %e, "device callback not exported");
            Ok(None)
        }
    }
}

/// Resolve `config.library` to a file: taken as a path if it exists,
/// otherwise as a bare name looked up in `config.search_paths`
fn find_library(config: &DeviceConfig) -> DeviceResult<PathBuf> {
    let name = config
        .library
        .as_deref()
        .ok_or_else(|| DeviceError::NotFound("no device library configured".to_string()))?;

    let direct = Path::new(name);
    if direct.exists() {
        return Ok(direct.to_path_buf());
    }

    let file_name = library_filename(name);
    config
        .search_paths
        .iter()
        .map(|dir| dir.join(&file_name))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| DeviceError::NotFound(name.to_string()))
}

/// Platform file name for a backend library name, e.g. `libcuda_backend.so`
/// on Linux. Names that already carry the platform suffix pass through.
pub fn library_filename(name: &str) -> String {
    use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};

    if name.ends_with(DLL_SUFFIX) {
        name.to_string()
    } else if name.starts_with(DLL_PREFIX) {
        format!("{}{}", name, DLL_SUFFIX)
    } else {
        format!("{}{}{}", DLL_PREFIX, name, DLL_SUFFIX)
    }
}
