//! Rendering schemas back into `.proto` source text.
//!
//! Output is deterministic: the same schema and pool always produce the
//! same bytes. A few readability rules shape the text:
//!
//! - nested messages and enums are declared inline right after the
//!   first field that uses them, instead of at the top of the block
//! - type references use the shortest name that stays unambiguous from
//!   the referencing scope, expanding component by component only as
//!   needed (up to an absolute, dot-prefixed name)
//! - map entry messages disappear into `map<K, V>` fields, and group
//!   fields absorb their body block

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::pool::{
    DescriptorBody, DescriptorPool, DescriptorRecord, EnumRecord, FieldRecord, FieldType,
    FileSchema, MessageRecord, NumberRange, ProtoSyntax, ServiceRecord,
};

/// Configuration for the renderer
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Indentation prepended per nesting level
    pub indent: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            indent: "    ".to_string(),
        }
    }
}

impl RenderConfig {
    /// Creates a new render config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the indentation string
    pub fn indent(mut self, indent: impl Into<String>) -> Self {
        self.indent = indent.into();
        self
    }
}

/// Renders [`FileSchema`] values into compilable `.proto` text.
#[derive(Debug, Clone, Default)]
pub struct ProtoRenderer {
    config: RenderConfig,
}

/// What a formatted field contributes to its enclosing block.
enum FieldOutput {
    /// A regular line (possibly carrying an inline block)
    Line(String),
    /// A line belonging to the oneof at the given declaration index
    OneofMember(u32, String),
}

impl ProtoRenderer {
    /// Creates a new renderer with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new renderer with custom configuration
    pub fn with_config(config: RenderConfig) -> Self {
        Self { config }
    }

    /// Renders one schema file against the pool holding its records.
    pub fn render_file(&self, file: &FileSchema, pool: &DescriptorPool) -> Result<String> {
        let mut out = format!("syntax = \"{}\";\n\n", file.syntax.as_str());
        let mut scopes: Vec<String> = vec![String::new()];

        if !file.package.is_empty() {
            out.push_str(&format!("package {};\n\n", file.package));
            scopes[0].clone_from(&file.package);
        }

        for (index, dependency) in file.dependencies.iter().enumerate() {
            let modifier = if file.public_dependencies.contains(&index) {
                " public"
            } else if file.weak_dependencies.contains(&index) {
                " weak"
            } else {
                ""
            };
            out.push_str(&format!("import{} \"{}\";\n", modifier, dependency));
            scopes.push(import_scope(dependency));
        }
        if !out.ends_with("\n\n") {
            out.push('\n');
        }

        let body = self.render_file_body(file, pool, &scopes)?;
        out.push_str(body.trim_matches('\n'));
        out.push('\n');
        Ok(out)
    }

    fn render_file_body(
        &self,
        file: &FileSchema,
        pool: &DescriptorPool,
        scopes: &[String],
    ) -> Result<String> {
        let mut blocks: IndexMap<String, String> = IndexMap::new();
        for path in &file.top_level {
            let record = pool.get(path).ok_or_else(|| Error::missing_record(path))?;
            let block = self.render_block(path, pool, scopes, file.syntax)?;
            blocks.insert(record.name.clone(), block);
        }

        let mut out = String::new();
        for service in &file.services {
            out.push_str(&self.render_service(service, scopes));
        }

        let mut extendees: IndexMap<String, String> = IndexMap::new();
        for extension in &file.extensions {
            let Some(target) = &extension.extendee else {
                continue;
            };
            let text = match self.format_field(extension, scopes, &mut blocks, file.syntax, true) {
                FieldOutput::Line(text) | FieldOutput::OneofMember(_, text) => text,
            };
            extendees.entry(target.clone()).or_default().push_str(&text);
        }

        for block in blocks.values() {
            out.push_str(&block[..block.len().saturating_sub(1)]);
        }
        for (target, fields) in &extendees {
            out.push_str(&self.wrap_block("extend", &min_name(target, scopes), fields, &[]));
        }

        let mut body = String::new();
        for (option, value) in &file.options {
            body.push_str(&format!("option {} = {};\n", option, value));
        }
        body.push_str(&out);
        Ok(collapse_blank_runs(&body))
    }

    fn render_block(
        &self,
        path: &str,
        pool: &DescriptorPool,
        scopes: &[String],
        syntax: ProtoSyntax,
    ) -> Result<String> {
        let record = pool.get(path).ok_or_else(|| Error::missing_record(path))?;
        match &record.body {
            DescriptorBody::Message(message) => {
                self.render_message_block(record, message, pool, scopes, syntax)
            }
            DescriptorBody::Enum(enumeration) => Ok(self.render_enum_block(record, enumeration)),
        }
    }

    fn render_message_block(
        &self,
        record: &DescriptorRecord,
        message: &MessageRecord,
        pool: &DescriptorPool,
        outer_scopes: &[String],
        syntax: ProtoSyntax,
    ) -> Result<String> {
        let mut scopes = outer_scopes.to_vec();
        scopes[0] = join_scope(&scopes[0], &record.name);

        let mut blocks: IndexMap<String, String> = IndexMap::new();
        for child_path in &message.nested {
            let child = pool
                .get(child_path)
                .ok_or_else(|| Error::missing_record(child_path))?;
            let block = self.render_block(child_path, pool, &scopes, syntax)?;
            blocks.insert(child.name.clone(), block);
        }

        if message.is_map_entry {
            let parts: Vec<String> = message
                .fields
                .iter()
                .map(|field| match &field.type_ref {
                    Some(reference) => min_name(reference, &scopes),
                    None => field.field_type.name().to_string(),
                })
                .collect();
            return Ok(format!(" map<{}>", parts.join(", ")));
        }

        let mut out = String::new();
        let mut oneof_bodies: IndexMap<u32, String> = IndexMap::new();
        for field in &message.fields {
            match self.format_field(field, &scopes, &mut blocks, syntax, false) {
                FieldOutput::Line(text) => out.push_str(&text),
                FieldOutput::OneofMember(index, text) => {
                    oneof_bodies.entry(index).or_default().push_str(&text);
                }
            }
        }

        for (index, name) in message.oneofs.iter().enumerate() {
            if let Some(body) = oneof_bodies.shift_remove(&(index as u32)) {
                out.push_str(&self.wrap_block("oneof", name, &body, &[]));
            }
        }

        out.push_str(&format_ranges(
            "extensions",
            &message.extension_ranges,
            &[],
            false,
        ));
        out.push_str(&format_ranges(
            "reserved",
            &message.reserved_ranges,
            &message.reserved_names,
            false,
        ));

        let mut extendees: IndexMap<String, String> = IndexMap::new();
        for extension in &message.extensions {
            let Some(target) = &extension.extendee else {
                continue;
            };
            let text = match self.format_field(extension, &scopes, &mut blocks, syntax, true) {
                FieldOutput::Line(text) | FieldOutput::OneofMember(_, text) => text,
            };
            extendees.entry(target.clone()).or_default().push_str(&text);
        }

        for block in blocks.values() {
            out.push_str(&block[..block.len().saturating_sub(1)]);
        }
        for (target, fields) in &extendees {
            out.push_str(&self.wrap_block("extend", &min_name(target, &scopes), fields, &[]));
        }

        Ok(self.wrap_block("message", &record.name, &out, &[]))
    }

    fn render_enum_block(&self, record: &DescriptorRecord, enumeration: &EnumRecord) -> String {
        let mut body = String::new();
        for value in &enumeration.values {
            body.push_str(&format!("{} = {};\n", value.name, value.number));
        }
        body.push_str(&format_ranges(
            "reserved",
            &enumeration.reserved_ranges,
            &enumeration.reserved_names,
            true,
        ));

        let mut seen = std::collections::HashSet::new();
        let aliased = enumeration.values.iter().any(|v| !seen.insert(v.number));
        let options: &[(&str, &str)] = if aliased {
            &[("allow_alias", "true")]
        } else {
            &[]
        };
        self.wrap_block("enum", &record.name, &body, options)
    }

    fn render_service(&self, service: &ServiceRecord, scopes: &[String]) -> String {
        let mut body = String::new();
        for method in &service.methods {
            body.push_str(&format!(
                "rpc {}({}{}) returns ({}{});\n",
                method.name,
                if method.client_streaming { "stream " } else { "" },
                min_name(&method.input_type, scopes),
                if method.server_streaming { "stream " } else { "" },
                min_name(&method.output_type, scopes),
            ));
        }
        self.wrap_block("service", &service.name, &body, &[])
    }

    fn format_field(
        &self,
        field: &FieldRecord,
        scopes: &[String],
        blocks: &mut IndexMap<String, String>,
        syntax: ProtoSyntax,
        extend: bool,
    ) -> FieldOutput {
        let mut type_name = field.field_type.name().to_string();
        let default = field
            .default_value
            .as_ref()
            .map(|raw| format_default(field.field_type, raw));

        let mut inline = String::new();
        if let Some(reference) = &field.type_ref {
            type_name = min_name(reference, scopes);
            let short = type_name.rsplit('.').next().unwrap_or(&type_name);

            // inline the referenced block at its first use; map entries
            // and group bodies are absorbed regardless of context
            let should_pop = blocks.get(short).is_some_and(|block| {
                (!extend && field.oneof_index.is_none())
                    || block.starts_with(" map<")
                    || field.field_type == FieldType::Group
            });
            if should_pop {
                if let Some(block) = blocks.shift_remove(short) {
                    inline = block[1..].to_string();
                }
            }
        }

        let mut line;
        if inline.starts_with("map<") {
            line = format!(
                "{} {} = {};\n",
                inline,
                field.name,
                format_number(field.number, default.as_deref())
            );
            inline = String::new();
        } else if field.field_type != FieldType::Group {
            line = format!(
                "{} {} {} = {};\n",
                field.label.name(),
                type_name,
                field.name,
                format_number(field.number, default.as_deref())
            );
        } else {
            line = format!(
                "{} group {} = {} ",
                field.label.name(),
                type_name,
                field.number
            );
            let body = inline.splitn(3, ' ').last().unwrap_or("");
            inline = if body.starts_with('{') {
                body.to_string()
            } else {
                "{}\n\n".to_string()
            };
        }

        // proto3 implicit-presence fields drop their label; fields that
        // carried a synthetic oneof keep the `optional` keyword
        let strip_label = field.oneof_index.is_some()
            || (syntax == ProtoSyntax::Proto3
                && line.starts_with("optional")
                && !field.proto3_optional);
        if strip_label && !line.starts_with("map<") {
            if let Some((_, rest)) = line.split_once(' ') {
                line = rest.to_string();
            }
        }
        if !inline.is_empty() {
            line = format!("\n{}", line);
        }

        match field.oneof_index {
            Some(index) => FieldOutput::OneofMember(index, format!("{}{}", line, inline)),
            None => FieldOutput::Line(format!("{}{}", line, inline)),
        }
    }

    fn wrap_block(&self, keyword: &str, name: &str, body: &str, options: &[(&str, &str)]) -> String {
        let mut value = String::new();
        for (option, option_value) in options {
            value.push_str(&format!("option {} = {};\n", option, option_value));
        }
        value.push_str(body);
        let value = collapse_blank_runs(&value);
        let trimmed = value.trim_matches('\n');

        let mut out = format!("\n{} {} {{\n", keyword, name);
        if trimmed.is_empty() {
            out.push_str("}\n\n");
            return out;
        }
        for line in trimmed.split('\n') {
            if line.is_empty() {
                out.push('\n');
            } else {
                out.push_str(&self.config.indent);
                out.push_str(line);
                out.push('\n');
            }
        }
        out.push_str("}\n\n");
        out
    }
}

/// Formats a field number, attaching bracketed options when present.
fn format_number(number: u32, default: Option<&str>) -> String {
    match default {
        Some(default) => format!("{} [{}]", number, default),
        None => number.to_string(),
    }
}

/// Formats a raw default value for the declared field type.
fn format_default(field_type: FieldType, raw: &str) -> String {
    match field_type {
        FieldType::String => format!("default = \"{}\"", escape_string(raw)),
        FieldType::Bytes => format!("default = \"{}\"", raw),
        _ => format!("default = {}", format_scalar_default(field_type, raw)),
    }
}

/// Reinterprets and formats a scalar default.
///
/// Producers that read defaults out of decompiled sources report them as
/// raw register values: unsigned numbers for negative constants, raw bit
/// patterns for floats. Values that do not parse as integers pass
/// through untouched.
fn format_scalar_default(field_type: FieldType, raw: &str) -> String {
    let Ok(parsed) = raw.parse::<i128>() else {
        return raw.to_string();
    };

    match field_type {
        FieldType::Float => {
            if (parsed.unsigned_abs() >> 23) != 0 {
                return format_float32((parsed & 0xFFFF_FFFF) as u32);
            }
        }
        FieldType::Double => {
            if (parsed.unsigned_abs() >> 52) != 0 {
                return format_float64((parsed & 0xFFFF_FFFF_FFFF_FFFF) as u64);
            }
        }
        _ => {}
    }

    let value = reinterpret_integer(field_type, parsed);
    if field_type.is_integer() && value >= 0x10000 && !has_digit_run(value) {
        format!("{:#x}", value)
    } else {
        value.to_string()
    }
}

/// Wraps an integer default into the declared width and signedness.
fn reinterpret_integer(field_type: FieldType, value: i128) -> i128 {
    if field_type.is_unsigned() {
        match field_type {
            FieldType::Uint32 | FieldType::Fixed32 => value & 0xFFFF_FFFF,
            _ => value & 0xFFFF_FFFF_FFFF_FFFF,
        }
    } else {
        match field_type {
            FieldType::Int32 | FieldType::Sint32 | FieldType::Sfixed32 => {
                if value >= 1 << 63 {
                    (value as u64 as i64) as i128
                } else if value >= 1 << 31 {
                    (value as u32 as i32) as i128
                } else {
                    value
                }
            }
            FieldType::Int64 | FieldType::Sint64 | FieldType::Sfixed64 => {
                if value >= 1 << 63 {
                    (value as u64 as i64) as i128
                } else {
                    value
                }
            }
            _ => value,
        }
    }
}

/// True if the decimal rendering contains a run of more than three
/// identical characters, which usually reads better in base 10.
fn has_digit_run(value: i128) -> bool {
    let text = value.to_string();
    let mut run = 0usize;
    let mut previous = None;
    for c in text.chars() {
        if Some(c) == previous {
            run += 1;
        } else {
            run = 1;
            previous = Some(c);
        }
        if run > 3 {
            return true;
        }
    }
    false
}

fn format_float32(bits: u32) -> String {
    let value = f32::from_bits(bits);
    if value.is_nan() {
        "nan".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "inf" } else { "-inf" }.to_string()
    } else {
        value.to_string()
    }
}

fn format_float64(bits: u64) -> String {
    let value = f64::from_bits(bits);
    if value.is_nan() {
        "nan".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "inf" } else { "-inf" }.to_string()
    } else {
        value.to_string()
    }
}

/// Formats number ranges and reserved names as one statement.
///
/// Message ranges carry an exclusive end; enum reserved ranges an
/// inclusive one. Ranges reaching the field number ceiling render as
/// `N to max`.
fn format_ranges(
    label: &str,
    ranges: &[NumberRange],
    names: &[String],
    inclusive_end: bool,
) -> String {
    let mut parts: Vec<String> = Vec::new();
    for range in ranges {
        let last = if inclusive_end { range.end } else { range.end - 1 };
        if last > range.start {
            let at_ceiling = if inclusive_end {
                range.end == i32::MAX
            } else {
                range.end >= 0x2000_0000
            };
            if at_ceiling {
                parts.push(format!("{} to max", range.start));
            } else {
                parts.push(format!("{} to {}", range.start, last));
            }
        } else {
            parts.push(range.start.to_string());
        }
    }
    for name in names {
        parts.push(format!("\"{}\"", escape_string(name)));
    }

    if parts.is_empty() {
        String::new()
    } else {
        format!("\n{} {};\n", label, parts.join(", "))
    }
}

/// Finds the smallest name that still uniquely refers to `name` from the
/// current scope chain.
///
/// The last component is expanded leftwards until the part not shared
/// with the current scope is spelled out, and further while the leading
/// component collides with a deeper name in any scope. Full expansion
/// produces an absolute, dot-prefixed reference.
fn min_name(name: &str, scopes: &[String]) -> String {
    let mut remaining: Vec<&str> = vec![""];
    remaining.extend(name.split('.'));
    let current = scope_components(scopes.first().map(String::as_str).unwrap_or(""));

    let mut short = match remaining.pop() {
        Some(part) => vec![part],
        None => return String::new(),
    };

    while !remaining.is_empty()
        && (current.get(..remaining.len()) != Some(remaining.as_slice())
            || scopes.iter().any(|scope| {
                list_rfind(&scope_components(scope), short[0]) > remaining.len() as isize
            }))
    {
        if let Some(part) = remaining.pop() {
            short.insert(0, part);
        }
    }

    short.join(".")
}

/// Splits a scope string into components with a root sentinel.
fn scope_components(scope: &str) -> Vec<&str> {
    let mut components = vec![""];
    if !scope.is_empty() {
        components.extend(scope.split('.'));
    }
    components
}

fn list_rfind(items: &[&str], needle: &str) -> isize {
    items
        .iter()
        .rposition(|item| *item == needle)
        .map_or(-1, |index| index as isize)
}

fn join_scope(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", scope, name)
    }
}

/// Scope contributed by an import: its directory path as a package.
fn import_scope(dependency: &str) -> String {
    let directory = dependency
        .rsplit_once('/')
        .map_or(dependency, |(dir, _)| dir);
    directory.replace('/', ".")
}

/// Collapses runs of blank lines down to a single blank line.
fn collapse_blank_runs(text: &str) -> String {
    let mut out = text.to_string();
    while out.contains("\n\n\n") {
        out = out.replace("\n\n\n", "\n\n");
    }
    out
}

/// Escapes a string for use in proto source text.
pub(crate) fn escape_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            c if (c as u32) < 0x20 => result.push_str(&format!("\\x{:02x}", c as u32)),
            c => result.push(c),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{DescriptorPool, EnumValueRecord, FieldLabel, MethodRecord};
    use pretty_assertions::assert_eq;

    fn message_with_fields(name: &str, fields: Vec<FieldRecord>) -> DescriptorRecord {
        let mut record = DescriptorRecord::message(name);
        record.as_message_mut().unwrap().fields = fields;
        record
    }

    fn single_message_file(path: &str, record: DescriptorRecord) -> (FileSchema, DescriptorPool) {
        let mut pool = DescriptorPool::new();
        pool.insert(path, record).unwrap();
        let mut file = FileSchema::new("test.proto", ProtoSyntax::Proto2);
        file.top_level.push(path.to_string());
        (file, pool)
    }

    #[test]
    fn test_minimal_message_exact_output() {
        let record = message_with_fields(
            "Foo",
            vec![FieldRecord::new(1, "a", FieldType::Int32, FieldLabel::Required)],
        );
        let (file, pool) = single_message_file("Foo", record);

        let text = ProtoRenderer::new().render_file(&file, &pool).unwrap();
        assert_eq!(
            text,
            "syntax = \"proto2\";\n\nmessage Foo {\n    required int32 a = 1;\n}\n"
        );
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let record = message_with_fields(
            "Foo",
            vec![FieldRecord::new(1, "a", FieldType::Int32, FieldLabel::Required)],
        );
        let (file, pool) = single_message_file("Foo", record);

        let renderer = ProtoRenderer::new();
        let first = renderer.render_file(&file, &pool).unwrap();
        let second = renderer.render_file(&file, &pool).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_package_and_import_header() {
        let record = message_with_fields("Foo", vec![]);
        let (mut file, pool) = single_message_file("com.app.Foo", record);
        file.package = "com.app".to_string();
        file.dependencies = vec![
            "other/types.proto".to_string(),
            "shared/base.proto".to_string(),
        ];
        file.public_dependencies = vec![1];

        let text = ProtoRenderer::new().render_file(&file, &pool).unwrap();
        assert!(text.starts_with(
            "syntax = \"proto2\";\n\npackage com.app;\n\nimport \"other/types.proto\";\nimport public \"shared/base.proto\";\n\n"
        ));
    }

    #[test]
    fn test_nested_message_declared_after_first_use() {
        let mut outer = DescriptorRecord::message("Outer");
        {
            let body = outer.as_message_mut().unwrap();
            body.fields.push(
                FieldRecord::new(1, "inner", FieldType::Message, FieldLabel::Optional)
                    .with_type_ref("Outer.Inner"),
            );
            body.nested.push("Outer.Inner".to_string());
        }
        let inner = message_with_fields(
            "Inner",
            vec![FieldRecord::new(1, "id", FieldType::Int32, FieldLabel::Optional)],
        );

        let mut pool = DescriptorPool::new();
        pool.insert("Outer.Inner", inner).unwrap();
        pool.insert("Outer", outer).unwrap();
        let mut file = FileSchema::new("test.proto", ProtoSyntax::Proto2);
        file.top_level.push("Outer".to_string());

        let text = ProtoRenderer::new().render_file(&file, &pool).unwrap();
        assert_eq!(
            text,
            "syntax = \"proto2\";\n\n\
             message Outer {\n\
             \x20   optional Inner inner = 1;\n\
             \x20   message Inner {\n\
             \x20       optional int32 id = 1;\n\
             \x20   }\n\
             }\n"
        );
    }

    #[test]
    fn test_unreferenced_nested_block_renders_after_fields() {
        let mut outer = DescriptorRecord::message("Outer");
        {
            let body = outer.as_message_mut().unwrap();
            body.fields
                .push(FieldRecord::new(1, "x", FieldType::Int32, FieldLabel::Optional));
            body.nested.push("Outer.Kind".to_string());
        }
        let mut kind = DescriptorRecord::enumeration("Kind");
        kind.as_enum_mut()
            .unwrap()
            .values
            .push(EnumValueRecord::new("KIND_A", 0));

        let mut pool = DescriptorPool::new();
        pool.insert("Outer.Kind", kind).unwrap();
        pool.insert("Outer", outer).unwrap();
        let mut file = FileSchema::new("test.proto", ProtoSyntax::Proto2);
        file.top_level.push("Outer".to_string());

        let text = ProtoRenderer::new().render_file(&file, &pool).unwrap();
        assert_eq!(
            text,
            "syntax = \"proto2\";\n\n\
             message Outer {\n\
             \x20   optional int32 x = 1;\n\
             \n\
             \x20   enum Kind {\n\
             \x20       KIND_A = 0;\n\
             \x20   }\n\
             }\n"
        );
    }

    #[test]
    fn test_map_field_rendering() {
        let mut outer = DescriptorRecord::message("Outer");
        {
            let body = outer.as_message_mut().unwrap();
            body.fields.push(
                FieldRecord::new(3, "counts", FieldType::Message, FieldLabel::Repeated)
                    .with_type_ref("pkg.Outer.CountsEntry"),
            );
            body.nested.push("pkg.Outer.CountsEntry".to_string());
        }
        let mut entry = DescriptorRecord::message("CountsEntry");
        {
            let body = entry.as_message_mut().unwrap();
            body.is_map_entry = true;
            body.fields
                .push(FieldRecord::new(1, "key", FieldType::String, FieldLabel::Optional));
            body.fields
                .push(FieldRecord::new(2, "value", FieldType::Int32, FieldLabel::Optional));
        }

        let mut pool = DescriptorPool::new();
        pool.insert("pkg.Outer.CountsEntry", entry).unwrap();
        pool.insert("pkg.Outer", outer).unwrap();
        let mut file = FileSchema::new("test.proto", ProtoSyntax::Proto2);
        file.package = "pkg".to_string();
        file.top_level.push("pkg.Outer".to_string());

        let text = ProtoRenderer::new().render_file(&file, &pool).unwrap();
        assert!(text.contains("    map<string, int32> counts = 3;\n"));
        assert!(!text.contains("CountsEntry"));
    }

    #[test]
    fn test_oneof_rendering() {
        let mut record = DescriptorRecord::message("Event");
        {
            let body = record.as_message_mut().unwrap();
            body.fields.push(
                FieldRecord::new(1, "text", FieldType::String, FieldLabel::Optional)
                    .with_oneof_index(0),
            );
            body.fields.push(
                FieldRecord::new(2, "code", FieldType::Int32, FieldLabel::Optional)
                    .with_oneof_index(0),
            );
            body.oneofs.push("payload".to_string());
        }
        let (file, pool) = single_message_file("Event", record);

        let text = ProtoRenderer::new().render_file(&file, &pool).unwrap();
        assert_eq!(
            text,
            "syntax = \"proto2\";\n\n\
             message Event {\n\
             \x20   oneof payload {\n\
             \x20       string text = 1;\n\
             \x20       int32 code = 2;\n\
             \x20   }\n\
             }\n"
        );
    }

    #[test]
    fn test_empty_oneof_is_skipped() {
        let mut record = DescriptorRecord::message("Event");
        {
            let body = record.as_message_mut().unwrap();
            body.fields
                .push(FieldRecord::new(1, "x", FieldType::Int32, FieldLabel::Optional));
            body.oneofs.push("_unused".to_string());
        }
        let (file, pool) = single_message_file("Event", record);

        let text = ProtoRenderer::new().render_file(&file, &pool).unwrap();
        assert!(!text.contains("oneof"));
    }

    #[test]
    fn test_group_field_absorbs_block() {
        let mut outer = DescriptorRecord::message("SearchResponse");
        {
            let body = outer.as_message_mut().unwrap();
            body.fields.push(
                FieldRecord::new(1, "result", FieldType::Group, FieldLabel::Repeated)
                    .with_type_ref("SearchResponse.Result"),
            );
            body.nested.push("SearchResponse.Result".to_string());
        }
        let result = message_with_fields(
            "Result",
            vec![FieldRecord::new(2, "url", FieldType::String, FieldLabel::Required)],
        );

        let mut pool = DescriptorPool::new();
        pool.insert("SearchResponse.Result", result).unwrap();
        pool.insert("SearchResponse", outer).unwrap();
        let mut file = FileSchema::new("test.proto", ProtoSyntax::Proto2);
        file.top_level.push("SearchResponse".to_string());

        let text = ProtoRenderer::new().render_file(&file, &pool).unwrap();
        assert_eq!(
            text,
            "syntax = \"proto2\";\n\n\
             message SearchResponse {\n\
             \x20   repeated group Result = 1 {\n\
             \x20       required string url = 2;\n\
             \x20   }\n\
             }\n"
        );
    }

    #[test]
    fn test_proto3_strips_optional_label() {
        let mut record = DescriptorRecord::message("Msg");
        {
            let body = record.as_message_mut().unwrap();
            body.fields
                .push(FieldRecord::new(1, "name", FieldType::String, FieldLabel::Optional));
            body.fields
                .push(FieldRecord::new(2, "tags", FieldType::String, FieldLabel::Repeated));
            body.fields.push(
                FieldRecord::new(3, "nickname", FieldType::String, FieldLabel::Optional)
                    .with_proto3_optional(),
            );
        }
        let mut pool = DescriptorPool::new();
        pool.insert("Msg", record).unwrap();
        let mut file = FileSchema::new("test.proto", ProtoSyntax::Proto3);
        file.top_level.push("Msg".to_string());

        let text = ProtoRenderer::new().render_file(&file, &pool).unwrap();
        assert!(text.contains("    string name = 1;\n"));
        assert!(text.contains("    repeated string tags = 2;\n"));
        assert!(text.contains("    optional string nickname = 3;\n"));
    }

    #[test]
    fn test_ranges_and_reserved() {
        let mut record = DescriptorRecord::message("Versioned");
        {
            let body = record.as_message_mut().unwrap();
            body.fields
                .push(FieldRecord::new(1, "x", FieldType::Int32, FieldLabel::Optional));
            body.extension_ranges.push(NumberRange::new(100, 0x2000_0000));
            body.reserved_ranges.push(NumberRange::new(2, 3));
            body.reserved_ranges.push(NumberRange::new(5, 11));
            body.reserved_names.push("legacy".to_string());
        }
        let (file, pool) = single_message_file("Versioned", record);

        let text = ProtoRenderer::new().render_file(&file, &pool).unwrap();
        assert!(text.contains("\n    extensions 100 to max;\n"));
        assert!(text.contains("\n    reserved 2, 5 to 10, \"legacy\";\n"));
    }

    #[test]
    fn test_enum_alias_option() {
        let mut record = DescriptorRecord::enumeration("Status");
        {
            let body = record.as_enum_mut().unwrap();
            body.values.push(EnumValueRecord::new("OK", 0));
            body.values.push(EnumValueRecord::new("SUCCESS", 0));
        }
        let mut pool = DescriptorPool::new();
        pool.insert("Status", record).unwrap();
        let mut file = FileSchema::new("test.proto", ProtoSyntax::Proto2);
        file.top_level.push("Status".to_string());

        let text = ProtoRenderer::new().render_file(&file, &pool).unwrap();
        assert_eq!(
            text,
            "syntax = \"proto2\";\n\n\
             enum Status {\n\
             \x20   option allow_alias = true;\n\
             \x20   OK = 0;\n\
             \x20   SUCCESS = 0;\n\
             }\n"
        );
    }

    #[test]
    fn test_enum_reserved_inclusive_ranges() {
        let mut record = DescriptorRecord::enumeration("Status");
        {
            let body = record.as_enum_mut().unwrap();
            body.values.push(EnumValueRecord::new("OK", 0));
            body.reserved_ranges.push(NumberRange::new(5, 5));
            body.reserved_ranges.push(NumberRange::new(10, i32::MAX));
        }
        let mut pool = DescriptorPool::new();
        pool.insert("Status", record).unwrap();
        let mut file = FileSchema::new("test.proto", ProtoSyntax::Proto2);
        file.top_level.push("Status".to_string());

        let text = ProtoRenderer::new().render_file(&file, &pool).unwrap();
        assert!(text.contains("\n    reserved 5, 10 to max;\n"));
    }

    #[test]
    fn test_service_rendering() {
        let mut pool = DescriptorPool::new();
        pool.insert("chat.Message", DescriptorRecord::message("Message"))
            .unwrap();
        let mut file = FileSchema::new("chat.proto", ProtoSyntax::Proto3);
        file.package = "chat".to_string();
        file.top_level.push("chat.Message".to_string());
        file.services.push(ServiceRecord {
            name: "Chat".to_string(),
            methods: vec![MethodRecord {
                name: "Stream".to_string(),
                input_type: "chat.Message".to_string(),
                output_type: "chat.Message".to_string(),
                client_streaming: true,
                server_streaming: true,
            }],
        });

        let text = ProtoRenderer::new().render_file(&file, &pool).unwrap();
        assert!(text.contains(
            "service Chat {\n    rpc Stream(stream Message) returns (stream Message);\n}\n"
        ));
    }

    #[test]
    fn test_extend_block() {
        let mut record = DescriptorRecord::message("Extra");
        record.as_message_mut().unwrap().extensions.push(
            FieldRecord::new(100, "extra", FieldType::Int32, FieldLabel::Optional)
                .with_extendee("pkg.Base"),
        );
        let mut base = DescriptorRecord::message("Base");
        base.as_message_mut()
            .unwrap()
            .extension_ranges
            .push(NumberRange::new(100, 200));

        let mut pool = DescriptorPool::new();
        pool.insert("pkg.Base", base).unwrap();
        pool.insert("pkg.Extra", record).unwrap();
        let mut file = FileSchema::new("test.proto", ProtoSyntax::Proto2);
        file.package = "pkg".to_string();
        file.top_level.push("pkg.Base".to_string());
        file.top_level.push("pkg.Extra".to_string());

        let text = ProtoRenderer::new().render_file(&file, &pool).unwrap();
        assert!(text.contains("    extend Base {\n        optional int32 extra = 100;\n    }\n"));
    }

    #[test]
    fn test_file_options_render_before_types() {
        let record = message_with_fields("Foo", vec![]);
        let (mut file, pool) = single_message_file("Foo", record);
        file.options.push((
            "java_package".to_string(),
            "\"com.example.protos\"".to_string(),
        ));

        let text = ProtoRenderer::new().render_file(&file, &pool).unwrap();
        assert!(text.starts_with(
            "syntax = \"proto2\";\n\noption java_package = \"com.example.protos\";\n\nmessage Foo"
        ));
    }

    #[test]
    fn test_min_name() {
        let scopes = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        assert_eq!(min_name("pkg.Msg", &scopes(&["pkg"])), "Msg");
        assert_eq!(min_name("pkg.Outer.Inner", &scopes(&["pkg.Outer"])), "Inner");
        assert_eq!(min_name("other.Msg", &scopes(&["pkg"])), "other.Msg");
        // a scope deeper than the shared prefix shadows the short name
        assert_eq!(
            min_name("other.C", &scopes(&["pkg", "pkg.other"])),
            ".other.C"
        );
        assert_eq!(min_name("Top", &scopes(&[""])), "Top");
    }

    #[test]
    fn test_default_values() {
        assert_eq!(
            format_default(FieldType::String, "a\"b\nc"),
            "default = \"a\\\"b\\nc\""
        );
        assert_eq!(format_default(FieldType::Bool, "true"), "default = true");
        assert_eq!(
            format_default(FieldType::Enum, "KIND_B"),
            "default = KIND_B"
        );
        // readable hex for large values without digit runs
        assert_eq!(
            format_default(FieldType::Uint32, "305419896"),
            "default = 0x12345678"
        );
        // repeated digits keep base 10
        assert_eq!(format_default(FieldType::Int32, "70000"), "default = 70000");
        assert_eq!(format_default(FieldType::Int32, "42"), "default = 42");
    }

    #[test]
    fn test_default_reinterpretation() {
        // 0xFFFFFFFF as a signed 32-bit value is -1
        assert_eq!(
            format_default(FieldType::Int32, "4294967295"),
            "default = -1"
        );
        // u64::MAX stays unsigned for fixed64 and renders in hex
        assert_eq!(
            format_default(FieldType::Fixed64, "18446744073709551615"),
            "default = 0xffffffffffffffff"
        );
        // raw bit patterns for floats are bit-cast back
        assert_eq!(
            format_default(FieldType::Float, "1069547520"),
            "default = 1.5"
        );
        assert_eq!(
            format_default(FieldType::Double, "4609434218613702656"),
            "default = 1.5"
        );
        // small integers stay plain numbers for float fields
        assert_eq!(format_default(FieldType::Float, "3"), "default = 3");
        // non-numeric values pass through
        assert_eq!(format_default(FieldType::Float, "2.5"), "default = 2.5");
    }

    #[test]
    fn test_escape_string() {
        assert_eq!(escape_string("simple"), "simple");
        assert_eq!(escape_string("a\"b"), "a\\\"b");
        assert_eq!(escape_string("tab\there"), "tab\\there");
        assert_eq!(escape_string("\x01"), "\\x01");
    }

    #[test]
    fn test_field_with_default_renders_brackets() {
        let record = message_with_fields(
            "Foo",
            vec![
                FieldRecord::new(1, "level", FieldType::Int32, FieldLabel::Optional)
                    .with_default("3"),
            ],
        );
        let (file, pool) = single_message_file("Foo", record);

        let text = ProtoRenderer::new().render_file(&file, &pool).unwrap();
        assert!(text.contains("    optional int32 level = 1 [default = 3];\n"));
    }
}
