//! NVS (Non-Volatile Storage) adapter.
//!
//! Implements [`StoragePort`] on the ESP-IDF NVS API.
//!
//! - Namespace isolation: Wi-Fi credentials live in `wifi_mgr`, broker
//!   secrets in `mqtt_sec`.
//! - Commit semantics: a value written with `set_*` is only guaranteed to
//!   survive a reset once `commit` for its namespace has returned.
//! - The simulation backend keeps staged and committed values apart so
//!   host tests can observe exactly what a power cycle would keep.

use crate::app::ports::StoragePort;
use crate::error::StorageError;
use log::info;

#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;
#[cfg(target_os = "espidf")]
use log::warn;

/// NVS namespace and key names are limited to 15 characters.
#[cfg(target_os = "espidf")]
const NVS_NAME_MAX: usize = 15;

pub struct NvsAdapter {
    #[cfg(not(target_os = "espidf"))]
    committed: HashMap<String, Vec<u8>>,
    #[cfg(not(target_os = "espidf"))]
    staged: HashMap<String, Vec<u8>>,
    #[cfg(not(target_os = "espidf"))]
    needs_erase: bool,
}

impl NvsAdapter {
    pub fn new() -> Self {
        #[cfg(not(target_os = "espidf"))]
        info!("NvsAdapter: simulation backend");

        Self {
            #[cfg(not(target_os = "espidf"))]
            committed: HashMap::new(),
            #[cfg(not(target_os = "espidf"))]
            staged: HashMap::new(),
            #[cfg(not(target_os = "espidf"))]
            needs_erase: false,
        }
    }
}

impl Default for NvsAdapter {
    fn default() -> Self {
        Self::new()
    }
}

// ── ESP-IDF backend ───────────────────────────────────────────

#[cfg(target_os = "espidf")]
impl NvsAdapter {
    /// NUL-terminated copy of a namespace or key name.
    fn c_name(name: &str) -> [u8; NVS_NAME_MAX + 1] {
        let mut buf = [0u8; NVS_NAME_MAX + 1];
        let len = name.len().min(NVS_NAME_MAX);
        buf[..len].copy_from_slice(&name.as_bytes()[..len]);
        buf
    }

    fn map_err(code: esp_err_t) -> StorageError {
        match code {
            c if c == ESP_ERR_NVS_NOT_FOUND as esp_err_t => StorageError::NotFound,
            c if c == ESP_ERR_NVS_NO_FREE_PAGES as esp_err_t
                || c == ESP_ERR_NVS_NEW_VERSION_FOUND as esp_err_t =>
            {
                StorageError::NeedsErase
            }
            c if c == ESP_ERR_NVS_INVALID_LENGTH as esp_err_t
                || c == ESP_ERR_NVS_NOT_ENOUGH_SPACE as esp_err_t =>
            {
                StorageError::Full
            }
            c => StorageError::IoError(c),
        }
    }

    fn check(code: esp_err_t) -> Result<(), StorageError> {
        if code == ESP_OK as esp_err_t { Ok(()) } else { Err(Self::map_err(code)) }
    }

    /// Open an NVS namespace, execute a closure with the handle, then close.
    fn with_nvs_handle<F, T>(namespace: &str, write: bool, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(nvs_handle_t) -> Result<T, StorageError>,
    {
        let ns = Self::c_name(namespace);
        let mode = if write {
            nvs_open_mode_t_NVS_READWRITE
        } else {
            nvs_open_mode_t_NVS_READONLY
        };

        let mut handle: nvs_handle_t = 0;
        // SAFETY: `ns` is NUL-terminated and outlives the call.
        Self::check(unsafe { nvs_open(ns.as_ptr() as *const _, mode, &mut handle) })?;

        let result = f(handle);
        // SAFETY: `handle` was opened above and is not used afterwards.
        unsafe { nvs_close(handle) };
        result
    }
}

#[cfg(target_os = "espidf")]
impl StoragePort for NvsAdapter {
    fn init(&mut self) -> Result<(), StorageError> {
        // SAFETY: called once from the main task before any other NVS use.
        Self::check(unsafe { nvs_flash_init() })?;
        info!("NvsAdapter: ESP-IDF NVS initialised");
        Ok(())
    }

    fn erase(&mut self) -> Result<(), StorageError> {
        warn!("NvsAdapter: erasing NVS partition");
        // SAFETY: no handles are open while the partition is erased.
        Self::check(unsafe { nvs_flash_erase() })
    }

    fn get_str(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let key = Self::c_name(key);
        Self::with_nvs_handle(namespace, false, |handle| {
            let mut size = buf.len();
            // SAFETY: `buf` is valid for `size` bytes; NVS writes at most that
            // many including the terminator.
            Self::check(unsafe {
                nvs_get_str(handle, key.as_ptr() as *const _, buf.as_mut_ptr() as *mut _, &mut size)
            })?;
            // `size` includes the NUL terminator.
            Ok(size.saturating_sub(1))
        })
    }

    fn set_str(&mut self, namespace: &str, key: &str, value: &str) -> Result<(), StorageError> {
        let key = Self::c_name(key);
        let mut owned = Vec::with_capacity(value.len() + 1);
        owned.extend_from_slice(value.as_bytes());
        owned.push(0);
        Self::with_nvs_handle(namespace, true, |handle| {
            // SAFETY: both pointers are NUL-terminated and live for the call.
            Self::check(unsafe { nvs_set_str(handle, key.as_ptr() as *const _, owned.as_ptr() as *const _) })
        })
    }

    fn get_blob(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let key = Self::c_name(key);
        Self::with_nvs_handle(namespace, false, |handle| {
            let mut size = buf.len();
            // SAFETY: `buf` is valid for `size` bytes.
            Self::check(unsafe {
                nvs_get_blob(handle, key.as_ptr() as *const _, buf.as_mut_ptr() as *mut _, &mut size)
            })?;
            Ok(size)
        })
    }

    fn set_blob(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let key = Self::c_name(key);
        Self::with_nvs_handle(namespace, true, |handle| {
            // SAFETY: `data` is valid for `data.len()` bytes.
            Self::check(unsafe {
                nvs_set_blob(handle, key.as_ptr() as *const _, data.as_ptr() as *const _, data.len())
            })
        })
    }

    fn commit(&mut self, namespace: &str) -> Result<(), StorageError> {
        Self::with_nvs_handle(namespace, true, |handle| {
            // SAFETY: `handle` is open read-write.
            Self::check(unsafe { nvs_commit(handle) })
        })
    }
}

// ── Simulation backend ────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
impl NvsAdapter {
    fn composite_key(namespace: &str, key: &str) -> String {
        format!("{}::{}", namespace, key)
    }

    fn lookup(&self, namespace: &str, key: &str) -> Option<&Vec<u8>> {
        let composite = Self::composite_key(namespace, key);
        self.staged.get(&composite).or_else(|| self.committed.get(&composite))
    }

    fn read_into(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let data = self.lookup(namespace, key).ok_or(StorageError::NotFound)?;
        if data.len() > buf.len() {
            return Err(StorageError::Full);
        }
        buf[..data.len()].copy_from_slice(data);
        Ok(data.len())
    }

    fn stage(&mut self, namespace: &str, key: &str, data: &[u8]) {
        self.staged.insert(Self::composite_key(namespace, key), data.to_vec());
    }

    /// Simulate a reset: uncommitted writes are lost.
    pub fn power_cycle(mut self) -> Self {
        self.staged.clear();
        self
    }

    /// Make the next `init` report a partition that must be erased.
    pub fn simulate_needs_erase(&mut self) {
        self.needs_erase = true;
    }
}

#[cfg(not(target_os = "espidf"))]
impl StoragePort for NvsAdapter {
    fn init(&mut self) -> Result<(), StorageError> {
        if self.needs_erase {
            return Err(StorageError::NeedsErase);
        }
        Ok(())
    }

    fn erase(&mut self) -> Result<(), StorageError> {
        self.committed.clear();
        self.staged.clear();
        self.needs_erase = false;
        info!("NvsAdapter: partition erased (simulation)");
        Ok(())
    }

    fn get_str(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        self.read_into(namespace, key, buf)
    }

    fn set_str(&mut self, namespace: &str, key: &str, value: &str) -> Result<(), StorageError> {
        self.stage(namespace, key, value.as_bytes());
        Ok(())
    }

    fn get_blob(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        self.read_into(namespace, key, buf)
    }

    fn set_blob(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.stage(namespace, key, data);
        Ok(())
    }

    fn commit(&mut self, namespace: &str) -> Result<(), StorageError> {
        let prefix = format!("{}::", namespace);
        let keys: Vec<String> = self.staged.keys().filter(|k| k.starts_with(&prefix)).cloned().collect();
        for k in keys {
            if let Some(v) = self.staged.remove(&k) {
                self.committed.insert(k, v);
            }
        }
        Ok(())
    }
}
