//! Proxy password prompt

use std::io::{self, Write};

/// Read the proxy password from the controlling terminal with echo disabled
///
/// The prompt is written to standard error; the terminal mode is restored on
/// every exit path.
pub fn read_proxy_password() -> io::Result<String> {
    let mut stderr = io::stderr();
    stderr.write_all(b"Proxy password: ")?;
    stderr.flush()?;

    let password = rpassword::read_password()?;

    stderr.write_all(b"\n")?;
    Ok(password)
}
