//! Binding to the system `libsrt`.

use std::ffi::{c_char, c_int, c_void, CStr};
use std::net::SocketAddr;

use socket2::SockAddr;
use tracing::debug;

use super::native::{check_startup, RawSocket, SrtApi};
use super::option::{OptionValue, SrtSocketOption};
use super::SrtSocketStatus;
use crate::TransportResult;

const SRT_ERROR: c_int = -1;

#[link(name = "srt")]
extern "C" {
    fn srt_startup() -> c_int;
    fn srt_cleanup() -> c_int;
    fn srt_create_socket() -> c_int;
    fn srt_setsockflag(u: c_int, opt: c_int, optval: *const c_void, optlen: c_int) -> c_int;
    fn srt_connect(u: c_int, name: *const c_void, namelen: c_int) -> c_int;
    fn srt_sendmsg2(u: c_int, buf: *const c_char, len: c_int, mctrl: *mut c_void) -> c_int;
    fn srt_getsockstate(u: c_int) -> c_int;
    fn srt_close(u: c_int) -> c_int;
    fn srt_getlasterror_str() -> *const c_char;
}

fn last_error() -> String {
    // SAFETY: libsrt returns a pointer to a thread-local, NUL-terminated string.
    unsafe {
        let message = srt_getlasterror_str();
        if message.is_null() {
            return "unknown error".to_string();
        }
        CStr::from_ptr(message).to_string_lossy().into_owned()
    }
}

/// The system SRT library. Startup and cleanup follow this value's lifetime.
pub struct LibSrt {
    _private: (),
}

impl LibSrt {
    pub fn new() -> TransportResult<Self> {
        // SAFETY: srt_startup is reference counted by the library.
        let result = unsafe { srt_startup() };
        check_startup(result, last_error)?;
        debug!(result, "libsrt started");
        Ok(Self { _private: () })
    }
}

impl Drop for LibSrt {
    fn drop(&mut self) {
        // SAFETY: paired with the srt_startup in `new`.
        unsafe {
            srt_cleanup();
        }
    }
}

impl SrtApi for LibSrt {
    fn create_socket(&self) -> Result<RawSocket, String> {
        // SAFETY: no arguments; failure is reported as SRT_ERROR.
        let socket = unsafe { srt_create_socket() };
        if socket == SRT_ERROR {
            return Err(last_error());
        }
        Ok(socket)
    }

    fn set_option(
        &self,
        socket: RawSocket,
        option: SrtSocketOption,
        value: &OptionValue,
    ) -> Result<(), String> {
        let id = option.native_id();
        // SAFETY: each pointer refers to a local that outlives the call, with its exact length.
        let result = unsafe {
            match value {
                OptionValue::Bool(flag) => {
                    let raw: i32 = i32::from(*flag);
                    srt_setsockflag(socket, id, &raw as *const i32 as *const c_void, 4)
                }
                OptionValue::Int32(raw) => {
                    srt_setsockflag(socket, id, raw as *const i32 as *const c_void, 4)
                }
                OptionValue::Int64(raw) => {
                    srt_setsockflag(socket, id, raw as *const i64 as *const c_void, 8)
                }
                OptionValue::String(text) => srt_setsockflag(
                    socket,
                    id,
                    text.as_ptr() as *const c_void,
                    text.len() as c_int,
                ),
            }
        };
        if result == SRT_ERROR {
            return Err(last_error());
        }
        Ok(())
    }

    fn connect(&self, socket: RawSocket, addr: SocketAddr) -> Result<(), String> {
        let addr = SockAddr::from(addr);
        // SAFETY: `addr` holds a valid sockaddr of `addr.len()` bytes.
        let result = unsafe { srt_connect(socket, addr.as_ptr() as *const c_void, addr.len() as c_int) };
        if result == SRT_ERROR {
            return Err(last_error());
        }
        Ok(())
    }

    fn send(&self, socket: RawSocket, data: &[u8]) -> Result<usize, String> {
        // SAFETY: `data` is valid for `data.len()` bytes; a null mctrl selects defaults.
        let result = unsafe {
            srt_sendmsg2(
                socket,
                data.as_ptr() as *const c_char,
                data.len() as c_int,
                std::ptr::null_mut(),
            )
        };
        if result == SRT_ERROR {
            return Err(last_error());
        }
        Ok(result as usize)
    }

    fn status(&self, socket: RawSocket) -> SrtSocketStatus {
        // SAFETY: querying an unknown descriptor returns SRTS_NONEXIST.
        SrtSocketStatus::from_raw(unsafe { srt_getsockstate(socket) })
    }

    fn close(&self, socket: RawSocket) {
        // SAFETY: the handle guarantees a single close per descriptor.
        unsafe {
            srt_close(socket);
        }
    }
}
