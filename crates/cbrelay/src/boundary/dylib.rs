// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registration entry points resolved from a shared library.

use std::os::raw::c_int;
use std::path::Path;

use libloading::{Library, Symbol};

use super::{ApiCall, NativeBoundary};
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::record::{RecordAddress, RegistrationRecord};

type RegisterCallbackFn = unsafe extern "C" fn(record: *mut RegistrationRecord, identity: c_int);
type UnregisterCallbackFn = unsafe extern "C" fn(record: *mut RegistrationRecord);
type RegisterCallResultFn = unsafe extern "C" fn(record: *mut RegistrationRecord, call: u64);
type UnregisterCallResultFn = unsafe extern "C" fn(record: *mut RegistrationRecord, call: u64);

/// Exported names of the four registration functions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundarySymbols {
    pub register_callback: String,
    pub unregister_callback: String,
    pub register_call_result: String,
    pub unregister_call_result: String,
}

impl Default for BoundarySymbols {
    /// Flat C API names.
    fn default() -> Self {
        Self {
            register_callback: "SteamAPI_RegisterCallback".to_string(),
            unregister_callback: "SteamAPI_UnregisterCallback".to_string(),
            register_call_result: "SteamAPI_RegisterCallResult".to_string(),
            unregister_call_result: "SteamAPI_UnregisterCallResult".to_string(),
        }
    }
}

/// Native boundary backed by a dynamically loaded library.
///
/// The native functions return nothing, so every call succeeds from the
/// dispatcher's point of view.
pub struct DylibBoundary {
    register_callback: RegisterCallbackFn,
    unregister_callback: UnregisterCallbackFn,
    register_call_result: RegisterCallResultFn,
    unregister_call_result: UnregisterCallResultFn,
    /// Keeps the function pointers above valid.
    _library: Library,
}

impl DylibBoundary {
    /// Load `path` and resolve the default symbols.
    ///
    /// # Safety
    ///
    /// Loading runs the library's initializers, and the resolved symbols
    /// must have the flat C API signatures.
    pub unsafe fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, &BoundarySymbols::default())
    }

    /// Load `path` and resolve `symbols`.
    ///
    /// # Safety
    ///
    /// Same contract as [`DylibBoundary::open`].
    pub unsafe fn open_with(path: impl AsRef<Path>, symbols: &BoundarySymbols) -> Result<Self> {
        let path = path.as_ref();
        let library = Library::new(path)
            .map_err(|e| Error::Library(format!("{}: {}", path.display(), e)))?;

        let register_callback = *resolve::<RegisterCallbackFn>(&library, &symbols.register_callback)?;
        let unregister_callback =
            *resolve::<UnregisterCallbackFn>(&library, &symbols.unregister_callback)?;
        let register_call_result =
            *resolve::<RegisterCallResultFn>(&library, &symbols.register_call_result)?;
        let unregister_call_result =
            *resolve::<UnregisterCallResultFn>(&library, &symbols.unregister_call_result)?;

        log::debug!("[dylib] loaded registration entry points from {}", path.display());
        Ok(Self {
            register_callback,
            unregister_callback,
            register_call_result,
            unregister_call_result,
            _library: library,
        })
    }
}

unsafe fn resolve<'lib, T>(library: &'lib Library, name: &str) -> Result<Symbol<'lib, T>> {
    library
        .get::<T>(name.as_bytes())
        .map_err(|e| Error::Library(format!("symbol {}: {}", name, e)))
}

impl std::fmt::Debug for DylibBoundary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DylibBoundary").finish_non_exhaustive()
    }
}

impl NativeBoundary for DylibBoundary {
    fn register_callback(&self, record: RecordAddress, identity: Identity) -> Result<()> {
        // SAFETY: the caller keeps the record alive until unregistration.
        unsafe { (self.register_callback)(record.as_ptr(), identity.raw()) };
        Ok(())
    }

    fn unregister_callback(&self, record: RecordAddress) -> Result<()> {
        // SAFETY: as above.
        unsafe { (self.unregister_callback)(record.as_ptr()) };
        Ok(())
    }

    fn register_call_result(&self, record: RecordAddress, call: ApiCall) -> Result<()> {
        // SAFETY: as above.
        unsafe { (self.register_call_result)(record.as_ptr(), call.raw()) };
        Ok(())
    }

    fn unregister_call_result(&self, record: RecordAddress, call: ApiCall) -> Result<()> {
        // SAFETY: as above.
        unsafe { (self.unregister_call_result)(record.as_ptr(), call.raw()) };
        Ok(())
    }
}
