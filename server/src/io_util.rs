//! spec.md §5 describes the per-request socket I/O as blocking
//! (`read_all`/`write_all`). mio streams are always non-blocking, so these
//! helpers emulate blocking semantics by retrying on `WouldBlock` with a
//! thread yield, from the worker-thread side of the ownership handoff
//! described in `poll_thread`.

use std::io::{self, ErrorKind, Read, Write};

use mio::net::TcpStream;

pub fn read_exact_blocking(stream: &mut TcpStream, buf: &mut [u8]) -> io::Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => return Err(io::Error::new(ErrorKind::UnexpectedEof, "connection closed")),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                std::thread::yield_now();
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

pub fn write_all_blocking(stream: &mut TcpStream, buf: &[u8]) -> io::Result<()> {
    let mut written = 0;
    while written < buf.len() {
        match stream.write(&buf[written..]) {
            Ok(0) => return Err(io::Error::new(ErrorKind::WriteZero, "failed to write whole buffer")),
            Ok(n) => written += n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                std::thread::yield_now();
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

pub fn read_u32_blocking(stream: &mut TcpStream) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    read_exact_blocking(stream, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub fn read_i32_blocking(stream: &mut TcpStream) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    read_exact_blocking(stream, &mut buf)?;
    Ok(i32::from_le_bytes(buf))
}
