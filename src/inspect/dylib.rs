//! Shared-object module loading through `dlopen`.
//!
//! # C entry point
//! ```text
//! typedef struct { uint32_t src_addr, dst_addr; uint16_t src_port, dst_port; } cs_info_t;
//! typedef struct { cs_info_t *sockaddr; uint8_t protocol; uint8_t *data; uint16_t data_len; } tran_t;
//! typedef struct { size_t len; uint8_t *data; } str_t;
//! typedef struct { size_t argv_number; str_t *elts; } module_argv_t;
//!
//! int <symbol>(tran_t *record, module_argv_t *argv);
//! ```
//! - Addresses hold the wire bytes in memory (network order), ports are
//!   host order, `protocol` is 1 for TCP and 2 for UDP
//! - Argument data is not NUL-terminated
//! - Every pointer is valid only for the duration of the call
//!
//! Libraries not found in the builtin table are opened from disk; the
//! handle stays open as long as a binding references it.

use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::inspect::error::LoadError;
use crate::inspect::loader::{BuiltinLoader, ModuleLoader};
use crate::inspect::module::{EntryPoint, ModuleArgument, RawModule};
use crate::inspect::record::TransferRecord;
use crate::inspect::tuple::{EndpointTuple, Protocol};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RawTuple {
    src_addr: u32,
    dst_addr: u32,
    src_port: u16,
    dst_port: u16,
}

impl From<&EndpointTuple> for RawTuple {
    fn from(tuple: &EndpointTuple) -> Self {
        Self {
            src_addr: tuple.src_addr.to_be(),
            dst_addr: tuple.dst_addr.to_be(),
            src_port: tuple.src_port,
            dst_port: tuple.dst_port,
        }
    }
}

#[repr(C)]
struct RawRecord {
    sockaddr: *const RawTuple,
    protocol: u8,
    data: *const u8,
    data_len: u16,
}

#[repr(C)]
struct RawArgument {
    len: usize,
    data: *const u8,
}

#[repr(C)]
struct RawArguments {
    count: usize,
    elts: *const RawArgument,
}

type RawEntry = unsafe extern "C" fn(*const RawRecord, *const RawArguments) -> c_int;

fn protocol_code(protocol: Protocol) -> u8 {
    match protocol {
        Protocol::Tcp => 0x01,
        Protocol::Udp => 0x02,
    }
}

/// An open shared object. Closed when the last binding drops it.
#[derive(Debug)]
struct Library {
    handle: *mut c_void,
    path: PathBuf,
}

// dlopen handles may be used and closed from any thread.
unsafe impl Send for Library {}
unsafe impl Sync for Library {}

impl Library {
    fn open(path: &Path) -> Result<Self, LoadError> {
        let not_found = || LoadError::LibraryNotFound(path.to_path_buf());
        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| not_found())?;

        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_LAZY) };
        if handle.is_null() {
            tracing::warn!(library = %path.display(), error = %last_dl_error(), "dlopen failed");
            return Err(not_found());
        }

        Ok(Self {
            handle,
            path: path.to_path_buf(),
        })
    }

    fn entry(&self, symbol: &str) -> Result<RawEntry, LoadError> {
        let not_found = || LoadError::SymbolNotFound {
            library: self.path.clone(),
            symbol: symbol.to_string(),
        };
        let c_symbol = CString::new(symbol).map_err(|_| not_found())?;

        let address = unsafe { libc::dlsym(self.handle, c_symbol.as_ptr()) };
        if address.is_null() {
            return Err(not_found());
        }
        Ok(unsafe { std::mem::transmute::<*mut c_void, RawEntry>(address) })
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        tracing::debug!(library = %self.path.display(), "Closing shared object");
        unsafe {
            libc::dlclose(self.handle);
        }
    }
}

fn last_dl_error() -> String {
    let message: *const c_char = unsafe { libc::dlerror() };
    if message.is_null() {
        return "unknown error".to_string();
    }
    unsafe { CStr::from_ptr(message) }.to_string_lossy().into_owned()
}

fn call(entry: RawEntry, record: &TransferRecord<'_>, args: &[ModuleArgument]) -> i32 {
    let tuple = RawTuple::from(record.tuple());
    let raw = RawRecord {
        sockaddr: &tuple,
        protocol: protocol_code(record.protocol()),
        data: record.payload().as_ptr(),
        data_len: record.payload_len(),
    };
    let elts: Vec<RawArgument> = args
        .iter()
        .map(|arg| RawArgument {
            len: arg.as_bytes().len(),
            data: arg.as_bytes().as_ptr(),
        })
        .collect();
    let argv = RawArguments {
        count: elts.len(),
        elts: elts.as_ptr(),
    };

    unsafe { entry(&raw, &argv) }
}

/// Loader for on-disk modules, with a builtin table consulted first.
pub struct DylibLoader {
    builtins: BuiltinLoader,
}

impl DylibLoader {
    pub fn new(builtins: BuiltinLoader) -> Self {
        Self { builtins }
    }

    /// Close every builtin module. Shared objects close when dropped.
    pub fn close_all(&self) {
        self.builtins.close_all();
    }
}

impl ModuleLoader for DylibLoader {
    fn resolve(&self, library: &Path, symbol: &str) -> Result<EntryPoint, LoadError> {
        match self.builtins.resolve(library, symbol) {
            Err(LoadError::LibraryNotFound(_)) => {}
            builtin => return builtin,
        }

        let library = Arc::new(Library::open(library)?);
        let entry = library.entry(symbol)?;
        tracing::info!(library = %library.path.display(), symbol, "Module loaded from shared object");

        Ok(RawModule::new(move |record, args| {
            let _open = &library;
            call(entry, record, args)
        })
        .into_entry_point())
    }
}
