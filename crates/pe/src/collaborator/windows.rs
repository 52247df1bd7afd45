//! Windows backend: a direct port of `rescle.cc`'s use of `LoadLibraryExW`/`EnumResourceNamesW`/
//! `BeginUpdateResourceW`/`UpdateResourceW`/`EndUpdateResourceW` to read and rewrite resources
//! through the OS loader instead of hand-parsing the PE file.

use super::{Collaborator, ResourceKey, Session};
use crate::error::{CommitFailedSnafu, Error, OpenFailedSnafu};
use crate::resource_dir::{RT_GROUP_ICON, RT_ICON, RT_MANIFEST, RT_RCDATA, RT_STRING, RT_VERSION};
use snafu::prelude::*;
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::os::windows::ffi::OsStrExt;
use std::path::Path;
use std::ptr;

use winapi::shared::minwindef::{BOOL, DWORD, FALSE, HMODULE, LPARAM, LPVOID, TRUE, WORD};
use winapi::shared::ntdef::LPCWSTR;
use winapi::um::libloaderapi::{
    BeginUpdateResourceW, EndUpdateResourceW, EnumResourceLanguagesW, EnumResourceNamesW,
    FindResourceExW, FreeLibrary, LoadLibraryExW, LoadResource, LockResource, SizeofResource,
    UpdateResourceW, LOAD_LIBRARY_AS_DATAFILE,
};

fn to_wide(path: &Path) -> Vec<u16> {
    OsStr::new(path).encode_wide().chain(std::iter::once(0)).collect()
}

/// Builds a `MAKEINTRESOURCEW`-style pointer-encoded numeric resource id/type.
fn int_resource(id: u16) -> LPCWSTR {
    id as usize as LPCWSTR
}

const RESOURCE_TYPES: [u16; 6] = [RT_VERSION, RT_ICON, RT_GROUP_ICON, RT_STRING, RT_MANIFEST, RT_RCDATA];

unsafe extern "system" fn enum_names_callback(
    _module: HMODULE,
    type_id: *const u16,
    name: *mut u16,
    lparam: LPARAM,
) -> BOOL {
    let state = &mut *(lparam as *mut NameCollectState);
    let name_id = name as usize as u16;
    state.names.push((state.type_id, name_id));
    let _ = type_id;
    TRUE
}

struct NameCollectState {
    type_id: u16,
    names: Vec<(u16, u16)>,
}

unsafe extern "system" fn enum_languages_callback(
    _module: HMODULE,
    _type_id: *const u16,
    _name: *const u16,
    language: WORD,
    lparam: LPARAM,
) -> BOOL {
    let languages = &mut *(lparam as *mut Vec<u16>);
    languages.push(language);
    TRUE
}

/// Loaded as a data file, read, and rewritten entirely through `Update`/`EndUpdateResource`.
pub struct WindowsCollaborator {
    session: Session,
    module: Option<HMODULE>,
    entries: BTreeMap<ResourceKey, Vec<u8>>,
    pending: BTreeMap<ResourceKey, Vec<u8>>,
    update_handle: Option<*mut winapi::ctypes::c_void>,
}

impl Default for WindowsCollaborator {
    fn default() -> Self {
        Self { session: Session::default(), module: None, entries: BTreeMap::new(), pending: BTreeMap::new(), update_handle: None }
    }
}

impl WindowsCollaborator {
    pub fn new() -> Self {
        Self::default()
    }

    fn enumerate_resources(&mut self) -> Result<(), Error> {
        let module = self.module.context(OpenFailedSnafu { reason: "no module loaded" })?;
        for &type_id in &RESOURCE_TYPES {
            let mut state = NameCollectState { type_id, names: Vec::new() };
            unsafe {
                EnumResourceNamesW(
                    module,
                    int_resource(type_id),
                    Some(enum_names_callback),
                    &mut state as *mut NameCollectState as LPARAM,
                );
            }
            for (type_id, name_id) in state.names {
                let mut languages = Vec::new();
                unsafe {
                    EnumResourceLanguagesW(
                        module,
                        int_resource(type_id),
                        int_resource(name_id),
                        Some(enum_languages_callback),
                        &mut languages as *mut Vec<u16> as LPARAM,
                    );
                }
                for language in languages {
                    let key = ResourceKey { type_id, name_id, language };
                    let data = self.read_resource(module, key)?;
                    self.entries.insert(key, data);
                }
            }
        }
        Ok(())
    }

    fn read_resource(&self, module: HMODULE, key: ResourceKey) -> Result<Vec<u8>, Error> {
        unsafe {
            let handle = FindResourceExW(module, int_resource(key.type_id), int_resource(key.name_id), key.language);
            ensure!(!handle.is_null(), crate::error::NotFoundSnafu {
                reason: format!("resource {:?} not present", key)
            });
            let size = SizeofResource(module, handle);
            let global = LoadResource(module, handle);
            ensure!(!global.is_null(), crate::error::NotFoundSnafu {
                reason: format!("failed to load resource {:?}", key)
            });
            let ptr = LockResource(global) as *const u8;
            ensure!(!ptr.is_null(), crate::error::NotFoundSnafu {
                reason: format!("failed to lock resource {:?}", key)
            });
            Ok(std::slice::from_raw_parts(ptr, size as usize).to_vec())
        }
    }
}

impl Collaborator for WindowsCollaborator {
    fn load(&mut self, path: &Path) -> Result<(), Error> {
        let wide = to_wide(path);
        let module = unsafe { LoadLibraryExW(wide.as_ptr(), ptr::null_mut(), LOAD_LIBRARY_AS_DATAFILE) };
        ensure!(!module.is_null(), OpenFailedSnafu {
            reason: format!("LoadLibraryExW failed for {}", path.display())
        });
        self.module = Some(module);
        self.session.loaded_path = Some(path.to_path_buf());
        self.enumerate_resources()?;
        Ok(())
    }

    fn enumerate(&self) -> Result<Vec<ResourceKey>, Error> {
        Ok(self.entries.keys().copied().collect())
    }

    fn read(&self, key: ResourceKey) -> Result<Vec<u8>, Error> {
        self.entries.get(&key).cloned().context(crate::error::NotFoundSnafu {
            reason: format!("resource {:?} not present", key),
        })
    }

    fn begin_update(&mut self, output_path: &Path) -> Result<(), Error> {
        let wide = to_wide(output_path);
        let handle = unsafe { BeginUpdateResourceW(wide.as_ptr(), FALSE) };
        ensure!(!handle.is_null(), CommitFailedSnafu { reason: "BeginUpdateResourceW failed" });
        self.update_handle = Some(handle);
        self.pending = self.entries.clone();
        self.session.output_path = Some(output_path.to_path_buf());
        Ok(())
    }

    fn update(&mut self, key: ResourceKey, data: Vec<u8>) -> Result<(), Error> {
        let handle = self.update_handle.context(CommitFailedSnafu { reason: "update called before begin_update" })?;
        let mut data = data;
        let (ptr, len) = if data.is_empty() {
            (ptr::null_mut(), 0)
        } else {
            (data.as_mut_ptr() as LPVOID, data.len() as DWORD)
        };
        let result = unsafe {
            UpdateResourceW(handle, int_resource(key.type_id), int_resource(key.name_id), key.language, ptr, len)
        };
        ensure!(result != 0, CommitFailedSnafu { reason: format!("UpdateResourceW failed for {:?}", key) });
        self.pending.insert(key, data);
        Ok(())
    }

    fn remove(&mut self, key: ResourceKey) -> Result<(), Error> {
        let handle = self.update_handle.context(CommitFailedSnafu { reason: "remove called before begin_update" })?;
        let result = unsafe {
            UpdateResourceW(handle, int_resource(key.type_id), int_resource(key.name_id), key.language, ptr::null_mut(), 0)
        };
        ensure!(result != 0, CommitFailedSnafu { reason: format!("UpdateResourceW failed to delete {:?}", key) });
        self.pending.remove(&key);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), Error> {
        let handle = self.update_handle.take().context(CommitFailedSnafu { reason: "commit called before begin_update" })?;
        let result = unsafe { EndUpdateResourceW(handle, FALSE) };
        ensure!(result != 0, CommitFailedSnafu { reason: "EndUpdateResourceW failed" });
        Ok(())
    }

    fn discard(&mut self) -> Result<(), Error> {
        if let Some(handle) = self.update_handle.take() {
            unsafe { EndUpdateResourceW(handle, TRUE) };
        }
        self.pending.clear();
        Ok(())
    }
}

impl Drop for WindowsCollaborator {
    fn drop(&mut self) {
        if let Some(module) = self.module.take() {
            unsafe { FreeLibrary(module) };
        }
    }
}
