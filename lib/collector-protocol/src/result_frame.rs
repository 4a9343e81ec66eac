//! Writers for the function request and result framing.
//!
//! A function result travels as
//!
//! ```text
//! FUNCTION_RESULT_BEGIN "<tx>" <code> "<content-type>" <expires_unix>
//! <payload bytes, one or more lines>
//! FUNCTION_RESULT_END
//! ```

use std::io::{self, Write};

use crate::keywords;

/// Write a `FUNCTION` request line for `transaction`.
pub fn write_function_request<W: Write>(
    out: &mut W,
    transaction: &str,
    timeout_secs: u64,
    function: &str,
    args: &[&str],
) -> io::Result<()> {
    write!(
        out,
        "{} \"{}\" {} \"{}\"",
        keywords::FUNCTION,
        transaction,
        timeout_secs,
        function
    )?;
    for arg in args {
        write!(out, " \"{arg}\"")?;
    }
    out.write_all(b"\n")
}

/// Open a function result frame.
pub fn write_result_begin<W: Write>(
    out: &mut W,
    transaction: &str,
    status_code: u16,
    content_type: &str,
    expires_unix: i64,
) -> io::Result<()> {
    writeln!(
        out,
        "{} \"{}\" {} \"{}\" {}",
        keywords::FUNCTION_RESULT_BEGIN,
        transaction,
        status_code,
        content_type,
        expires_unix
    )
}

/// Close a function result frame.
pub fn write_result_end<W: Write>(out: &mut W) -> io::Result<()> {
    writeln!(out, "{}", keywords::FUNCTION_RESULT_END)
}

/// Write a complete function result frame around `payload`. A missing
/// final newline on the payload is supplied so the end keyword starts a
/// line of its own.
pub fn write_result<W: Write>(
    out: &mut W,
    transaction: &str,
    status_code: u16,
    content_type: &str,
    expires_unix: i64,
    payload: &[u8],
) -> io::Result<()> {
    write_result_begin(out, transaction, status_code, content_type, expires_unix)?;
    out.write_all(payload)?;
    if !payload.ends_with(b"\n") {
        out.write_all(b"\n")?;
    }
    write_result_end(out)
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn request_line_quotes_every_field() {
        let mut out = Vec::new();
        write_function_request(&mut out, "txn-1", 5, "get_version", &["--full"])
            .expect("write succeeds");
        assert_eq!(
            String::from_utf8(out).expect("ascii"),
            "FUNCTION \"txn-1\" 5 \"get_version\" \"--full\"\n"
        );
    }

    #[test]
    fn result_frame_is_newline_terminated() {
        let mut out = Vec::new();
        write_result(&mut out, "txn-1", 200, "application/json", 1_700_000_000, b"{}")
            .expect("write succeeds");
        assert_eq!(
            String::from_utf8(out).expect("ascii"),
            indoc! {r#"
                FUNCTION_RESULT_BEGIN "txn-1" 200 "application/json" 1700000000
                {}
                FUNCTION_RESULT_END
            "#}
        );
    }

    #[test]
    fn payload_newline_is_not_doubled() {
        let mut out = Vec::new();
        write_result(&mut out, "t", 200, "text/plain", 0, b"v1.2.3\n").expect("write succeeds");
        assert_eq!(
            String::from_utf8(out).expect("ascii"),
            "FUNCTION_RESULT_BEGIN \"t\" 200 \"text/plain\" 0\nv1.2.3\nFUNCTION_RESULT_END\n"
        );
    }
}
