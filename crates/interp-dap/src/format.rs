//! Bounded rendering of runtime values for the `variables` view.

use std::fmt::Write as _;

use interp_debug::{Value, ValueKind};
use time::macros::format_description;
use time::OffsetDateTime;

/// Appended when rendered content was dropped.
pub const ELLIPSIS: &str = "...";

// Guards against reference cycles whose links render as empty text.
const MAX_DEPTH: usize = 64;

/// Render `value` into at most `max_length` characters, followed by [`ELLIPSIS`] when
/// anything was dropped. A top-level nil value renders as `nil`.
pub fn render(value: &Value, max_length: usize) -> String {
    if value.is_nil() {
        return "nil".to_string();
    }
    let mut printer = ValuePrinter::new(max_length);
    printer.print(value);
    printer.finish()
}

/// Character-bounded writer for value text.
///
/// Counts characters, not bytes, so truncation never splits a UTF-8 sequence. Once the
/// budget is exhausted nothing is recursed into.
#[derive(Debug)]
pub struct ValuePrinter {
    max_length: usize,
    written: usize,
    overflow: bool,
    buffer: String,
}

impl ValuePrinter {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            written: 0,
            overflow: false,
            buffer: String::new(),
        }
    }

    pub fn is_full(&self) -> bool {
        self.written >= self.max_length
    }

    /// Render `value` and reset the printer so it can be reused.
    pub fn print_string(&mut self, value: &Value) -> String {
        self.print(value);
        let out = self.finish_ref();
        self.buffer.clear();
        self.written = 0;
        self.overflow = false;
        out
    }

    pub fn print(&mut self, value: &Value) {
        self.print_at(value, 0);
    }

    pub fn finish(self) -> String {
        self.finish_ref()
    }

    fn finish_ref(&self) -> String {
        let mut out = self.buffer.clone();
        if self.overflow {
            out.push_str(ELLIPSIS);
        }
        out
    }

    fn write(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let remaining = self.max_length.saturating_sub(self.written);
        if remaining == 0 {
            self.overflow = true;
            return;
        }
        match text.char_indices().nth(remaining) {
            Some((cut, _)) => {
                self.buffer.push_str(&text[..cut]);
                self.written = self.max_length;
                self.overflow = true;
            }
            None => {
                self.buffer.push_str(text);
                self.written += text.chars().count();
            }
        }
    }

    fn print_at(&mut self, value: &Value, depth: usize) {
        if self.is_full() || depth > MAX_DEPTH {
            self.overflow = true;
            return;
        }

        match &value.kind {
            ValueKind::Bool(b) => self.write(if *b { "true" } else { "false" }),
            ValueKind::Int(i) => self.write(&i.to_string()),
            ValueKind::Uint(u) => self.write(&u.to_string()),
            ValueKind::Float(f) => self.write(&format_float(*f)),
            ValueKind::Complex { re, im } => self.write(&format_complex(*re, *im)),
            ValueKind::String(s) => self.write(&quote(s)),
            ValueKind::Timestamp(ts) => {
                self.write(&value.type_name);
                self.write(" ");
                match format_timestamp(*ts) {
                    Ok(text) => self.write(&text),
                    Err(_) => self.write(&ts.unix_timestamp().to_string()),
                }
            }
            ValueKind::Pointer(None) => {
                self.write(&value.type_name);
                self.write(" nil");
            }
            ValueKind::Pointer(Some(target)) => {
                self.write("*");
                self.print_at(&target.get(), depth + 1);
            }
            ValueKind::Interface(None) => self.write("nil"),
            ValueKind::Interface(Some(target)) => self.print_at(&target.get(), depth + 1),
            ValueKind::Array(elements) => self.print_elements(&value.type_name, elements, depth),
            ValueKind::Slice(elements) => {
                self.print_elements(&value.type_name, elements.as_deref().unwrap_or(&[]), depth)
            }
            ValueKind::Struct(fields) => {
                self.write(&value.type_name);
                self.write("{");
                for (i, field) in fields.iter().enumerate() {
                    if self.is_full() {
                        self.overflow = true;
                        break;
                    }
                    if i > 0 {
                        self.write(",");
                    }
                    self.write(field_name(&field.name, &field.value));
                    self.write(":");
                    self.print_at(&field.value, depth + 1);
                }
                self.write("}");
            }
            ValueKind::Map(entries) => {
                self.write(&value.type_name);
                self.write("{");
                for (i, (key, val)) in entries.as_deref().unwrap_or(&[]).iter().enumerate() {
                    if self.is_full() {
                        self.overflow = true;
                        break;
                    }
                    if i > 0 {
                        self.write(",");
                    }
                    self.print_at(key, depth + 1);
                    self.write(":");
                    self.print_at(val, depth + 1);
                }
                self.write("}");
            }
            ValueKind::Chan { .. } | ValueKind::Func { .. } => self.write(&value.type_name),
            ValueKind::Opaque(text) => {
                self.write(&value.type_name);
                self.write(" ");
                self.write(text);
            }
        }
    }

    fn print_elements(&mut self, type_name: &str, elements: &[Value], depth: usize) {
        self.write(type_name);
        self.write("{");
        for (i, element) in elements.iter().enumerate() {
            if self.is_full() {
                self.overflow = true;
                break;
            }
            if i > 0 {
                self.write(",");
            }
            self.print_at(element, depth + 1);
        }
        self.write("}");
    }
}

/// Display name of a struct field; embedded fields are named after their type.
pub fn field_name<'a>(name: &'a str, value: &'a Value) -> &'a str {
    if name.is_empty() {
        &value.type_name
    } else {
        name
    }
}

/// Shortest round-trip form, switching to exponent notation outside `[1e-4, 1e21)`.
fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "NaN".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "+Inf" } else { "-Inf" }.to_string();
    }
    let abs = f.abs();
    if abs == 0.0 || (1e-4..1e21).contains(&abs) {
        return f.to_string();
    }

    let formatted = format!("{f:e}");
    let Some((mantissa, exponent)) = formatted.split_once('e') else {
        return formatted;
    };
    let (sign, digits) = match exponent.strip_prefix('-') {
        Some(digits) => ('-', digits),
        None => ('+', exponent),
    };
    format!("{mantissa}e{sign}{digits:0>2}")
}

fn format_complex(re: f64, im: f64) -> String {
    let im_text = format_float(im);
    let sign = if im_text.starts_with('-') || im_text.starts_with('+') {
        ""
    } else {
        "+"
    };
    format!("({}{sign}{im_text}i)", format_float(re))
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{7}' => out.push_str("\\a"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            '\u{b}' => out.push_str("\\v"),
            c if c.is_control() => {
                let code = c as u32;
                let _ = if code < 0x80 {
                    write!(out, "\\x{code:02x}")
                } else if code <= 0xffff {
                    write!(out, "\\u{code:04x}")
                } else {
                    write!(out, "\\U{code:08x}")
                };
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// `2024-06-06 01:02:03.5 +0000 UTC`; fractional seconds only when non-zero.
fn format_timestamp(ts: OffsetDateTime) -> Result<String, time::error::Format> {
    let mut out = ts.format(format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))?;
    if ts.nanosecond() != 0 {
        out.push_str(&ts.format(format_description!(".[subsecond digits:1+]"))?);
    }

    let zone = ts.format(format_description!("[offset_hour sign:mandatory][offset_minute]"))?;
    out.push(' ');
    out.push_str(&zone);
    out.push(' ');
    if ts.offset().is_utc() {
        out.push_str("UTC");
    } else {
        out.push_str(&zone);
    }
    Ok(out)
}
