use camino::Utf8Path;
use md5::Context;
use std::fs::File;
use std::io::{BufReader, Read};

/// Streaming md5 of a file, as a lowercase hex string. ResourceSync digests
/// are compared case-insensitively but published lowercase.
pub fn md5_file(path: &Utf8Path) -> std::io::Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Context::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.consume(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn md5_bytes(data: &[u8]) -> String {
    let mut hasher = Context::new();
    hasher.consume(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    #[test]
    fn file_and_buffer_digests_agree() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("f.txt")).unwrap();
        std::fs::write(&path, b"hello").unwrap();
        assert_eq!(md5_file(&path).unwrap(), md5_bytes(b"hello"));
        assert_eq!(md5_bytes(b"hello"), "5d41402abc4b2a76b9719d911017c592");
    }
}
