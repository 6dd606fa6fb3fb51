//! Guest-side wrappers for the `recast` host imports.

use std::sync::{Arc, OnceLock};

use recast_types::{CodecError, Diagnostic, InvocationMeta};

/// Log severity levels understood by the host.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
}

/// Why the host refused a `write_record` call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostRejection {
    #[error("host could not read the emitted record")]
    Malformed,
    #[error("topic '{0}' is not a declared output topic")]
    UnknownTopic(String),
    #[error("host returned unexpected code {0}")]
    Code(i32),
}

impl HostRejection {
    #[must_use]
    pub fn from_code(code: i32, topic: &str) -> Self {
        match code {
            recast_types::abi::WRITE_MALFORMED => Self::Malformed,
            recast_types::abi::WRITE_UNKNOWN_TOPIC => Self::UnknownTopic(topic.to_string()),
            other => Self::Code(other),
        }
    }
}

/// Host imports abstraction to make host FFI behavior testable on native targets.
pub trait HostImports: Send + Sync {
    fn log(&self, level: i32, message: &str);
    fn write_record(&self, topic: &str, encoded: &[u8]) -> Result<(), HostRejection>;
    fn read_metadata(&self) -> Result<InvocationMeta, CodecError>;
    fn report_error(&self, diagnostic: &Diagnostic);
    fn env_get(&self, key: &str) -> Option<String>;
}

static HOST_IMPORTS: OnceLock<Arc<dyn HostImports>> = OnceLock::new();

fn default_host_imports() -> Arc<dyn HostImports> {
    #[cfg(target_arch = "wasm32")]
    {
        Arc::new(WasmHostImports)
    }

    #[cfg(not(target_arch = "wasm32"))]
    {
        Arc::new(StubHostImports)
    }
}

/// Process-wide host imports, installed on first use.
pub fn host_imports() -> Arc<dyn HostImports> {
    Arc::clone(HOST_IMPORTS.get_or_init(default_host_imports))
}

/// Installs a custom host imports implementation.
///
/// This is primarily intended for tests and native embedding.
///
/// # Errors
///
/// Returns the rejected implementation if imports were already installed.
pub fn set_host_imports(imports: Arc<dyn HostImports>) -> Result<(), Arc<dyn HostImports>> {
    HOST_IMPORTS.set(imports)
}

#[cfg(target_arch = "wasm32")]
mod raw {
    #[link(wasm_import_module = "recast")]
    extern "C" {
        pub fn write_record(topic_ptr: i32, topic_len: i32, rec_ptr: i32, rec_len: i32) -> i32;
        pub fn read_metadata(out_ptr: i32, out_cap: i32) -> i32;
        pub fn report_error(ptr: i32, len: i32);
        pub fn log(level: i32, ptr: i32, len: i32);
        pub fn env_get(key_ptr: i32, key_len: i32, out_ptr: i32, out_cap: i32) -> i32;
    }
}

#[cfg(target_arch = "wasm32")]
pub struct WasmHostImports;

#[cfg(target_arch = "wasm32")]
impl HostImports for WasmHostImports {
    fn log(&self, level: i32, message: &str) {
        unsafe { raw::log(level, message.as_ptr() as i32, message.len() as i32) }
    }

    fn write_record(&self, topic: &str, encoded: &[u8]) -> Result<(), HostRejection> {
        let rc = unsafe {
            raw::write_record(
                topic.as_ptr() as i32,
                topic.len() as i32,
                encoded.as_ptr() as i32,
                encoded.len() as i32,
            )
        };
        if rc == recast_types::abi::WRITE_OK {
            Ok(())
        } else {
            Err(HostRejection::from_code(rc, topic))
        }
    }

    fn read_metadata(&self) -> Result<InvocationMeta, CodecError> {
        let mut buf = [0u8; recast_types::meta::META_LEN];
        let n = unsafe { raw::read_metadata(buf.as_mut_ptr() as i32, buf.len() as i32) };
        if n < 0 {
            return Err(CodecError::Truncated {
                field: "invocation metadata",
                needed: n.unsigned_abs() as usize,
                remaining: buf.len(),
            });
        }
        InvocationMeta::decode(&buf[..n as usize])
    }

    fn report_error(&self, diagnostic: &Diagnostic) {
        if let Ok(json) = diagnostic.to_json() {
            unsafe { raw::report_error(json.as_ptr() as i32, json.len() as i32) }
        }
    }

    fn env_get(&self, key: &str) -> Option<String> {
        let mut buf = vec![0u8; 256];
        loop {
            let n = unsafe {
                raw::env_get(
                    key.as_ptr() as i32,
                    key.len() as i32,
                    buf.as_mut_ptr() as i32,
                    buf.len() as i32,
                )
            };
            if n < 0 {
                return None;
            }
            let n = n as usize;
            if n <= buf.len() {
                buf.truncate(n);
                return String::from_utf8(buf).ok();
            }
            buf.resize(n, 0);
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub struct StubHostImports;

#[cfg(not(target_arch = "wasm32"))]
impl HostImports for StubHostImports {
    fn log(&self, _level: i32, _message: &str) {}

    fn write_record(&self, _topic: &str, _encoded: &[u8]) -> Result<(), HostRejection> {
        Ok(())
    }

    fn read_metadata(&self) -> Result<InvocationMeta, CodecError> {
        Ok(InvocationMeta::default())
    }

    fn report_error(&self, _diagnostic: &Diagnostic) {}

    fn env_get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

pub fn log(level: LogLevel, message: &str) {
    host_imports().log(level as i32, message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_codes_map_to_variants() {
        assert_eq!(HostRejection::from_code(-1, "t"), HostRejection::Malformed);
        assert_eq!(
            HostRejection::from_code(-2, "audit"),
            HostRejection::UnknownTopic("audit".into())
        );
        assert_eq!(HostRejection::from_code(-9, "t"), HostRejection::Code(-9));
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn native_stub_accepts_writes_and_returns_default_meta() {
        let stub = StubHostImports;
        assert!(stub.write_record("out", &[1, 2, 3]).is_ok());
        assert_eq!(stub.read_metadata().unwrap(), InvocationMeta::default());
    }
}
