use std::io::Write;

use crate::errors::*;

/// Destination for exported message content.
///
/// Anything implementing `std::io::Write` is a sink, so a `File`, a
/// `Vec<u8>` or a socket can be handed to `EmailDocument::save_attachment`.
pub trait ByteSink {
    fn write_bytes(&mut self, data: &[u8]) -> Result<()>;
}

impl<W: Write> ByteSink for W {
    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.write_all(data)?;
        self.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::io;

    use super::*;

    struct Full;

    impl Write for Full {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn vec_collects_bytes() {
        let mut sink = Vec::new();
        sink.write_bytes(b"abc").unwrap();
        sink.write_bytes(b"def").unwrap();
        assert_eq!(b"abcdef".to_vec(), sink);
    }

    #[test]
    fn io_errors_propagate() {
        match Full.write_bytes(b"x") {
            Err(Error(ErrorKind::Io(_), _)) => (),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
