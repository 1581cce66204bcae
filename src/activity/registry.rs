//! Consent store access through the Win32 registry API

use windows::core::{PCWSTR, PWSTR};
use windows::Win32::Foundation::{
    ERROR_ACCESS_DENIED, ERROR_FILE_NOT_FOUND, ERROR_MORE_DATA, ERROR_NO_MORE_ITEMS,
    ERROR_SUCCESS, WIN32_ERROR,
};
use windows::Win32::System::Registry::{
    RegCloseKey, RegEnumKeyExW, RegOpenKeyExW, RegQueryValueExW, HKEY, HKEY_CURRENT_USER,
    KEY_READ, REG_QWORD, REG_VALUE_TYPE,
};
use tracing::debug;

use super::consent::UsageRecords;
use super::ActivityReadError;

const LAST_USED_TIME_STOP: &str = "LastUsedTimeStop";

/// Longest key name the registry allows, plus the terminator
const MAX_KEY_NAME: usize = 256;

/// `HKEY_CURRENT_USER` consent store
#[derive(Debug, Default)]
pub struct WindowsRegistry;

/// Open key closed on drop
struct OwnedKey(HKEY);

impl Drop for OwnedKey {
    fn drop(&mut self) {
        unsafe {
            let _ = RegCloseKey(self.0);
        }
    }
}

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

fn read_error(location: &str, status: WIN32_ERROR) -> ActivityReadError {
    if status == ERROR_ACCESS_DENIED {
        ActivityReadError::PermissionDenied(location.to_string())
    } else {
        ActivityReadError::Os {
            location: location.to_string(),
            code: status.0,
        }
    }
}

/// Open a key under HKCU, `None` when it does not exist
fn open(path: &str) -> Result<Option<OwnedKey>, ActivityReadError> {
    let name = wide(path);
    let mut key = HKEY::default();

    let status = unsafe {
        RegOpenKeyExW(
            HKEY_CURRENT_USER,
            PCWSTR(name.as_ptr()),
            0,
            KEY_READ,
            &mut key,
        )
    };

    match status {
        ERROR_SUCCESS => Ok(Some(OwnedKey(key))),
        ERROR_FILE_NOT_FOUND => Ok(None),
        other => Err(read_error(path, other)),
    }
}

impl UsageRecords for WindowsRegistry {
    fn children(&self, location: &str) -> Result<Option<Vec<String>>, ActivityReadError> {
        let Some(key) = open(location)? else {
            return Ok(None);
        };

        let mut names = Vec::new();
        let mut buf = [0u16; MAX_KEY_NAME];

        for index in 0.. {
            let mut len = buf.len() as u32;
            let status = unsafe {
                RegEnumKeyExW(
                    key.0,
                    index,
                    PWSTR(buf.as_mut_ptr()),
                    &mut len,
                    None,
                    PWSTR::null(),
                    None,
                    None,
                )
            };

            match status {
                ERROR_SUCCESS => names.push(String::from_utf16_lossy(&buf[..len as usize])),
                ERROR_NO_MORE_ITEMS => break,
                ERROR_MORE_DATA => debug!(location, index, "skipping over-long key name"),
                other => {
                    debug!(location, index, code = other.0, "enumeration stopped early");
                    break;
                }
            }
        }

        Ok(Some(names))
    }

    fn last_stopped(&self, record: &str) -> Result<Option<u64>, ActivityReadError> {
        let Some(key) = open(record)? else {
            return Ok(None);
        };

        let value_name = wide(LAST_USED_TIME_STOP);
        let mut kind = REG_VALUE_TYPE::default();
        let mut value = 0u64;
        let mut size = std::mem::size_of::<u64>() as u32;

        let status = unsafe {
            RegQueryValueExW(
                key.0,
                PCWSTR(value_name.as_ptr()),
                None,
                Some(&mut kind as *mut REG_VALUE_TYPE),
                Some(&mut value as *mut u64 as *mut u8),
                Some(&mut size as *mut u32),
            )
        };

        match status {
            ERROR_SUCCESS if kind == REG_QWORD => Ok(Some(value)),
            ERROR_SUCCESS => {
                debug!(record, kind = kind.0, "unexpected value type");
                Ok(None)
            }
            ERROR_FILE_NOT_FOUND => Ok(None),
            other => Err(read_error(record, other)),
        }
    }
}
