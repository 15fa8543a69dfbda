use std::io::{ErrorKind, Read, Result};

/// Rounds `n` up to the next multiple of `to`, which must be a power of two.
pub fn round_up(n: u64, to: u64) -> u64 {
    (n + to - 1) & !(to - 1)
}

/// This function reads into the buffer until it is full or the reader reports EOF, possibly
/// performing multiple reads to do so (and also retrying if required to deal with EINTR).
///
/// Unlike the standard Read::read_exact() method, hitting EOF early is not an error: the caller
/// gets the number of bytes that were actually read and decides for itself whether a partial
/// buffer is acceptable.
///
/// # Return value
///
///  - the number of bytes read, which is equal to `buf.len()` unless EOF was reached first
///  - in case of underlying errors from the Read implementation, the error is returned directly
pub fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;

    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(filled)
}
