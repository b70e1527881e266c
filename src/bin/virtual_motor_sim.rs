#[cfg(unix)]
fn main() -> std::io::Result<()> {
    use std::io;
    use std::thread;
    use std::time::{Duration, Instant};

    use log::{info, Level};
    use robstride::motor::protocol::virtual_uart::VirtualUartPort;
    use robstride::motor::sim::RobstrideBusSim;

    simple_logger::init_with_level(Level::Info)
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;

    let motor_ids = [1u8, 127u8];
    let mut sim = RobstrideBusSim::new();
    for id in motor_ids {
        sim.add_motor(id);
    }

    let mut port = VirtualUartPort::new()?;

    info!("Virtual Robstride bus ready.");
    info!("Slave device: {}", port.slave_path());
    info!("Motor IDs: {motor_ids:?}");
    info!("Press Ctrl-C to stop.");

    let mut rx_buffer: Vec<u8> = Vec::new();
    let mut last_step = Instant::now();

    loop {
        let handled = sim.serve_port(&mut port, &mut rx_buffer)?;

        let now = Instant::now();
        let dt = (now - last_step).as_secs_f32();
        if dt >= 0.005 {
            sim.step(dt);
            last_step = now;
        }

        if handled == 0 {
            thread::sleep(Duration::from_millis(1));
        }
    }
}

#[cfg(not(unix))]
fn main() {
    eprintln!("virtual_motor_sim is only supported on Unix-like systems.");
}
