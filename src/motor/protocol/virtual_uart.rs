//! Pseudo-terminal serial link for running the driver against the simulator without an adapter.

use std::ffi::CStr;
use std::io;
use std::os::unix::io::RawFd;

use crate::motor::protocol::port_handler::PortHandler;

/// Master side of a pty. The slave path is what a host program opens as its serial device.
#[derive(Debug)]
pub struct VirtualUartPort {
    master_fd: RawFd,
    slave_path: String,
}

impl VirtualUartPort {
    pub fn new() -> io::Result<Self> {
        unsafe {
            let fd = libc::posix_openpt(libc::O_RDWR | libc::O_NOCTTY);
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }
            if libc::grantpt(fd) != 0 || libc::unlockpt(fd) != 0 {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(err);
            }

            let name_ptr = libc::ptsname(fd);
            if name_ptr.is_null() {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(err);
            }
            let slave_path = CStr::from_ptr(name_ptr).to_string_lossy().into_owned();

            // Raw mode so the 0x0D 0x0A tail is not translated by the line discipline.
            let mut term: libc::termios = std::mem::zeroed();
            if libc::tcgetattr(fd, &mut term) == 0 {
                libc::cfmakeraw(&mut term);
                libc::tcsetattr(fd, libc::TCSANOW, &term);
            }

            let flags = libc::fcntl(fd, libc::F_GETFL);
            if flags >= 0 {
                libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
            }

            Ok(Self {
                master_fd: fd,
                slave_path,
            })
        }
    }

    pub fn slave_path(&self) -> &str {
        &self.slave_path
    }
}

impl Drop for VirtualUartPort {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.master_fd);
        }
    }
}

impl PortHandler for VirtualUartPort {
    fn clear_port(&mut self) {
        let available = self.get_bytes_available();
        if available > 0 {
            let _ = self.read_port(available);
        }
    }

    fn read_port(&mut self, length: usize) -> io::Result<Vec<u8>> {
        let mut out = vec![0u8; length];
        if length == 0 {
            return Ok(out);
        }
        let read_len = unsafe {
            libc::read(
                self.master_fd,
                out.as_mut_ptr() as *mut libc::c_void,
                length,
            )
        };
        if read_len < 0 {
            let err = io::Error::last_os_error();
            // EIO means no slave is open yet; treat it like an empty line.
            return match err.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Ok(Vec::new()),
                _ if err.raw_os_error() == Some(libc::EIO) => Ok(Vec::new()),
                _ => Err(err),
            };
        }
        out.truncate(read_len as usize);
        Ok(out)
    }

    fn write_port(&mut self, packet: &[u8]) -> io::Result<usize> {
        if packet.is_empty() {
            return Ok(0);
        }
        let written = unsafe {
            libc::write(
                self.master_fd,
                packet.as_ptr() as *const libc::c_void,
                packet.len(),
            )
        };
        if written < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(written as usize)
    }

    fn get_bytes_available(&self) -> usize {
        let mut bytes: libc::c_int = 0;
        let ok = unsafe { libc::ioctl(self.master_fd, libc::FIONREAD, &mut bytes) } == 0;
        if ok {
            bytes as usize
        } else {
            0
        }
    }
}
