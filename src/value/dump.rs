//! Multi-line rendering of values, used for assertion messages and as diff input.
//!
//! Containers are printed one child per line with two-space indentation, so a line
//! diff of two dumps lines up structurally. Objects already on the rendering stack
//! print as `recursion(-N)`, where `N` is how many levels up the cycle closes.

use chrono::SecondsFormat;

use super::{format_number, Object, Primitive, Proto, Value};

/// Containers nested deeper than this print as `[object Kind]`.
const MAX_DEPTH: usize = 5;
const INDENT: &str = "  ";

/// Renders `value` as an indented, multi-line string.
///
/// # Examples
///
/// ```rust
/// use proctor::value::{dump, Value};
/// assert_eq!(dump(&Value::from("a\"b")), r#""a\"b""#);
/// assert_eq!(dump(&Value::array([1, 2])), "[\n  1,\n  2\n]");
/// ```
pub fn dump(value: &Value) -> String {
    let mut dumper = Dumper {
        stack: Vec::new(),
        depth: 1,
        out: String::new(),
    };
    dumper.write(value);
    dumper.out
}

struct Dumper {
    /// Addresses of the objects currently being rendered.
    stack: Vec<usize>,
    depth: usize,
    out: String,
}

impl Dumper {
    fn write(&mut self, value: &Value) {
        match value {
            Value::Undefined => self.out.push_str("undefined"),
            Value::Null => self.out.push_str("null"),
            Value::Bool(b) => self.out.push_str(if *b { "true" } else { "false" }),
            Value::Number(n) => self.out.push_str(&format_number(*n)),
            Value::String(s) => self.write_quoted(s),
            Value::Object(obj) => {
                if let Some(pos) = self.stack.iter().position(|addr| *addr == obj.addr()) {
                    let up = self.stack.len() - pos;
                    self.out.push_str(&format!("recursion(-{up})"));
                    return;
                }
                self.stack.push(obj.addr());
                let object = obj.borrow();
                self.write_object(&object);
                self.stack.pop();
            }
        }
    }

    fn write_object(&mut self, object: &Object) {
        match object {
            Object::Record { proto, props } => {
                let open = match proto {
                    Proto::Class(class) => format!("{} {{", class.name()),
                    _ => "{".to_string(),
                };
                let entries: Vec<(&String, &Value)> = props.iter().collect();
                self.write_container(object.kind_name(), &open, "}", entries.len(), |d, i| {
                    let (key, value) = entries[i];
                    d.write_quoted(key);
                    d.out.push_str(": ");
                    d.write(value);
                });
            }
            Object::Array(items) => {
                self.write_container("Array", "[", "]", items.len(), |d, i| d.write(&items[i]));
            }
            Object::Set(items) => {
                self.write_container("Set", "Set [", "]", items.len(), |d, i| d.write(&items[i]));
            }
            Object::Map(entries) => {
                self.write_container("Map", "Map {", "}", entries.len(), |d, i| {
                    let (key, value) = &entries[i];
                    d.write(key);
                    d.out.push_str(" => ");
                    d.write(value);
                });
            }
            Object::Date(at) => {
                let text = at.to_rfc3339_opts(SecondsFormat::Millis, true);
                self.write_quoted(&text);
            }
            Object::RegExp { source, flags } => {
                self.out.push_str(&format!("/{source}/{flags}"));
            }
            Object::Boxed(primitive) => match primitive {
                Primitive::Bool(b) => self.out.push_str(if *b { "true" } else { "false" }),
                Primitive::Number(n) => self.out.push_str(&format_number(*n)),
                Primitive::String(s) => self.write_quoted(s),
            },
            Object::Function(function) => {
                if function.name.is_empty() {
                    self.out.push_str("function() { [code] }");
                } else {
                    self.out.push_str(&format!("function {}() {{ [code] }}", function.name));
                }
            }
        }
    }

    fn write_container<F>(&mut self, kind: &str, open: &str, close: &str, len: usize, mut item: F)
    where
        F: FnMut(&mut Self, usize),
    {
        if self.depth > MAX_DEPTH {
            self.out.push_str(&format!("[object {kind}]"));
            return;
        }
        if len == 0 {
            self.out.push_str(open);
            self.out.push_str(close);
            return;
        }
        self.depth += 1;
        self.out.push_str(open);
        for i in 0..len {
            self.out.push('\n');
            self.push_indent(self.depth - 1);
            item(self, i);
            if i + 1 < len {
                self.out.push(',');
            }
        }
        self.depth -= 1;
        self.out.push('\n');
        self.push_indent(self.depth - 1);
        self.out.push_str(close);
    }

    fn push_indent(&mut self, level: usize) {
        for _ in 0..level {
            self.out.push_str(INDENT);
        }
    }

    fn write_quoted(&mut self, text: &str) {
        self.out.push('"');
        for c in text.chars() {
            match c {
                '\\' => self.out.push_str("\\\\"),
                '"' => self.out.push_str("\\\""),
                _ => self.out.push(c),
            }
        }
        self.out.push('"');
    }
}
