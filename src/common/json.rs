// JSON output helpers
//
// Response documents are written incrementally, so nested values must be
// indented relative to the line prefix of the surrounding document.

use std::io;

use serde::Serialize;
use serde_json::ser::{Formatter, Serializer};

/// Pretty formatter that starts every new line with `prefix`, followed by
/// `indent` repeated once per nesting level. The first line is not prefixed.
pub struct PrefixedFormatter<'a> {
    prefix: &'a [u8],
    indent: &'a [u8],
    level: usize,
    has_value: bool,
}

impl<'a> PrefixedFormatter<'a> {
    pub fn new(prefix: &'a str, indent: &'a str) -> Self {
        Self {
            prefix: prefix.as_bytes(),
            indent: indent.as_bytes(),
            level: 0,
            has_value: false,
        }
    }

    fn new_line<W>(&self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b"\n")?;
        writer.write_all(self.prefix)?;
        for _ in 0..self.level {
            writer.write_all(self.indent)?;
        }
        Ok(())
    }
}

impl Formatter for PrefixedFormatter<'_> {
    fn begin_array<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.level += 1;
        self.has_value = false;
        writer.write_all(b"[")
    }

    fn end_array<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.level -= 1;
        if self.has_value {
            self.new_line(writer)?;
        }
        writer.write_all(b"]")
    }

    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if !first {
            writer.write_all(b",")?;
        }
        self.new_line(writer)
    }

    fn end_array_value<W>(&mut self, _writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.has_value = true;
        Ok(())
    }

    fn begin_object<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.level += 1;
        self.has_value = false;
        writer.write_all(b"{")
    }

    fn end_object<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.level -= 1;
        if self.has_value {
            self.new_line(writer)?;
        }
        writer.write_all(b"}")
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if !first {
            writer.write_all(b",")?;
        }
        self.new_line(writer)
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }

    fn end_object_value<W>(&mut self, _writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.has_value = true;
        Ok(())
    }
}

/// Serialize `value` into `writer`, compact when both `prefix` and `indent`
/// are empty, otherwise pretty printed relative to `prefix`.
pub fn write_value<W, T>(writer: W, value: &T, prefix: &str, indent: &str) -> serde_json::Result<()>
where
    W: io::Write,
    T: ?Sized + Serialize,
{
    if prefix.is_empty() && indent.is_empty() {
        return serde_json::to_writer(writer, value);
    }
    let mut serializer = Serializer::with_formatter(writer, PrefixedFormatter::new(prefix, indent));
    value.serialize(&mut serializer)
}

/// String form of [`write_value`]
pub fn to_string<T>(value: &T, prefix: &str, indent: &str) -> serde_json::Result<String>
where
    T: ?Sized + Serialize,
{
    let mut out = Vec::new();
    write_value(&mut out, value, prefix, indent)?;
    // serde_json only emits valid UTF-8
    Ok(String::from_utf8_lossy(&out).into_owned())
}
