pub mod frame_codec;
pub mod param_table;
pub mod port_handler;
pub mod response;
pub mod serial_envelope;
pub mod serial_port;
#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub mod socket_can;
pub mod transport;
#[cfg(unix)]
pub mod virtual_uart;
