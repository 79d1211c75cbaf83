//! Flat descriptor pool and the record types stored in it.
//!
//! Every message and enum recovered from an input lives in a
//! [`DescriptorPool`] under a stable, fully qualified path such as
//! `com.app.Outer$Inner`. The `$` separator marks source-level nesting
//! reported by the producer (for example Java inner classes); the
//! resolver later converts those hints, together with the reference
//! edges in a [`ReferrerTable`], into real protobuf nesting.
//!
//! Pool paths never change once inserted. All later renaming and
//! relocation is tracked in side tables, which keeps reference edges
//! valid for the whole lifetime of a resolution run.

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::MAX_FIELD_NUMBER;

pub mod convert;

/// Separator used in pool paths to mark producer-reported nesting.
pub const NESTED_SEPARATOR: char = '$';

/// Scalar and composite field types, mirroring the descriptor type enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// 64-bit floating point
    Double,
    /// 32-bit floating point
    Float,
    /// Variable-length signed 64-bit integer
    Int64,
    /// Variable-length unsigned 64-bit integer
    Uint64,
    /// Variable-length signed 32-bit integer
    Int32,
    /// Fixed-width unsigned 64-bit integer
    Fixed64,
    /// Fixed-width unsigned 32-bit integer
    Fixed32,
    /// Boolean
    Bool,
    /// UTF-8 string
    String,
    /// Deprecated inline group
    Group,
    /// Embedded message
    Message,
    /// Raw bytes
    Bytes,
    /// Variable-length unsigned 32-bit integer
    Uint32,
    /// Enumeration
    Enum,
    /// Fixed-width signed 32-bit integer
    Sfixed32,
    /// Fixed-width signed 64-bit integer
    Sfixed64,
    /// ZigZag-encoded signed 32-bit integer
    Sint32,
    /// ZigZag-encoded signed 64-bit integer
    Sint64,
}

impl FieldType {
    /// Returns the proto language keyword for this type.
    ///
    /// Message, group and enum fields are rendered through their type
    /// reference instead, so their keyword never reaches output.
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Double => "double",
            FieldType::Float => "float",
            FieldType::Int64 => "int64",
            FieldType::Uint64 => "uint64",
            FieldType::Int32 => "int32",
            FieldType::Fixed64 => "fixed64",
            FieldType::Fixed32 => "fixed32",
            FieldType::Bool => "bool",
            FieldType::String => "string",
            FieldType::Group => "group",
            FieldType::Message => "message",
            FieldType::Bytes => "bytes",
            FieldType::Uint32 => "uint32",
            FieldType::Enum => "enum",
            FieldType::Sfixed32 => "sfixed32",
            FieldType::Sfixed64 => "sfixed64",
            FieldType::Sint32 => "sint32",
            FieldType::Sint64 => "sint64",
        }
    }

    /// Returns true for the integer family (varint, zigzag and fixed-width).
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            FieldType::Int32
                | FieldType::Int64
                | FieldType::Uint32
                | FieldType::Uint64
                | FieldType::Sint32
                | FieldType::Sint64
                | FieldType::Fixed32
                | FieldType::Fixed64
                | FieldType::Sfixed32
                | FieldType::Sfixed64
        )
    }

    /// Returns true for types whose integer defaults are unsigned.
    ///
    /// `sfixed32`/`sfixed64` are signed despite the fixed-width encoding.
    pub fn is_unsigned(&self) -> bool {
        matches!(
            self,
            FieldType::Uint32 | FieldType::Uint64 | FieldType::Fixed32 | FieldType::Fixed64
        )
    }

    /// Returns true for types that render through a type reference.
    pub fn is_named(&self) -> bool {
        matches!(self, FieldType::Message | FieldType::Group | FieldType::Enum)
    }
}

/// Field cardinality labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldLabel {
    /// Optional field (implicit presence in proto3)
    Optional,
    /// Required field (proto2 only)
    Required,
    /// Repeated field
    Repeated,
}

impl FieldLabel {
    /// Returns the proto language keyword for this label.
    pub fn name(&self) -> &'static str {
        match self {
            FieldLabel::Optional => "optional",
            FieldLabel::Required => "required",
            FieldLabel::Repeated => "repeated",
        }
    }
}

/// A single field of a message, or an extension field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRecord {
    /// Field number on the wire
    pub number: u32,
    /// Field name
    pub name: String,
    /// Declared type
    pub field_type: FieldType,
    /// Cardinality label
    pub label: FieldLabel,
    /// Raw default value as reported by the producer, if any
    pub default_value: Option<String>,
    /// Pool path of the referenced message or enum, for named types
    pub type_ref: Option<String>,
    /// Index into the containing message's oneof declarations
    pub oneof_index: Option<u32>,
    /// True for proto3 fields declared `optional` (explicit presence)
    pub proto3_optional: bool,
    /// Pool path of the extended message, for extension fields
    pub extendee: Option<String>,
}

impl FieldRecord {
    /// Creates a new field with no default, reference or oneof membership.
    pub fn new(
        number: u32,
        name: impl Into<String>,
        field_type: FieldType,
        label: FieldLabel,
    ) -> Self {
        Self {
            number,
            name: name.into(),
            field_type,
            label,
            default_value: None,
            type_ref: None,
            oneof_index: None,
            proto3_optional: false,
            extendee: None,
        }
    }

    /// Sets the pool path this field's type refers to.
    pub fn with_type_ref(mut self, path: impl Into<String>) -> Self {
        self.type_ref = Some(path.into());
        self
    }

    /// Sets the raw default value.
    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Marks this field as a member of the oneof at `index`.
    pub fn with_oneof_index(mut self, index: u32) -> Self {
        self.oneof_index = Some(index);
        self
    }

    /// Marks this field as a proto3 `optional` field with explicit presence.
    pub fn with_proto3_optional(mut self) -> Self {
        self.proto3_optional = true;
        self
    }

    /// Marks this field as an extension of the message at `path`.
    pub fn with_extendee(mut self, path: impl Into<String>) -> Self {
        self.extendee = Some(path.into());
        self
    }
}

/// A single named value of an enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValueRecord {
    /// Value name
    pub name: String,
    /// Numeric value
    pub number: i32,
}

impl EnumValueRecord {
    /// Creates a new enum value.
    pub fn new(name: impl Into<String>, number: i32) -> Self {
        Self {
            name: name.into(),
            number,
        }
    }
}

/// A contiguous numeric range.
///
/// Message extension and reserved ranges use an exclusive `end`, as in
/// the descriptor format. Enum reserved ranges use an inclusive `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumberRange {
    /// First number in the range
    pub start: i32,
    /// Range end (see type docs for exclusivity)
    pub end: i32,
}

impl NumberRange {
    /// Creates a new range.
    pub fn new(start: i32, end: i32) -> Self {
        Self { start, end }
    }
}

/// Body of a message record.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MessageRecord {
    /// Fields in declaration order
    pub fields: Vec<FieldRecord>,
    /// Pool paths of children nested under this message, in nesting order
    pub nested: Vec<String>,
    /// True if this message is a synthesized map entry
    pub is_map_entry: bool,
    /// Oneof declaration names, indexed by `FieldRecord::oneof_index`
    pub oneofs: Vec<String>,
    /// Extension fields declared inside this message
    pub extensions: Vec<FieldRecord>,
    /// Extension number ranges (exclusive end)
    pub extension_ranges: Vec<NumberRange>,
    /// Reserved number ranges (exclusive end)
    pub reserved_ranges: Vec<NumberRange>,
    /// Reserved field names
    pub reserved_names: Vec<String>,
}

/// Body of an enum record.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnumRecord {
    /// Values in declaration order
    pub values: Vec<EnumValueRecord>,
    /// Reserved number ranges (inclusive end)
    pub reserved_ranges: Vec<NumberRange>,
    /// Reserved value names
    pub reserved_names: Vec<String>,
}

/// Message or enum payload of a [`DescriptorRecord`].
#[derive(Debug, Clone, PartialEq)]
pub enum DescriptorBody {
    /// A message definition
    Message(MessageRecord),
    /// An enum definition
    Enum(EnumRecord),
}

/// A message or enum held in a [`DescriptorPool`].
///
/// `name` is the display name used when rendering. It starts out as the
/// last component of the pool path and may be rewritten by the resolver;
/// the pool path itself never changes.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorRecord {
    /// Current display name
    pub name: String,
    /// Message or enum body
    pub body: DescriptorBody,
}

impl DescriptorRecord {
    /// Creates an empty message record.
    pub fn message(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: DescriptorBody::Message(MessageRecord::default()),
        }
    }

    /// Creates an empty enum record.
    pub fn enumeration(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: DescriptorBody::Enum(EnumRecord::default()),
        }
    }

    /// Returns the message body, if this record is a message.
    pub fn as_message(&self) -> Option<&MessageRecord> {
        match &self.body {
            DescriptorBody::Message(m) => Some(m),
            DescriptorBody::Enum(_) => None,
        }
    }

    /// Returns the mutable message body, if this record is a message.
    pub fn as_message_mut(&mut self) -> Option<&mut MessageRecord> {
        match &mut self.body {
            DescriptorBody::Message(m) => Some(m),
            DescriptorBody::Enum(_) => None,
        }
    }

    /// Returns the enum body, if this record is an enum.
    pub fn as_enum(&self) -> Option<&EnumRecord> {
        match &self.body {
            DescriptorBody::Enum(e) => Some(e),
            DescriptorBody::Message(_) => None,
        }
    }

    /// Returns the mutable enum body, if this record is an enum.
    pub fn as_enum_mut(&mut self) -> Option<&mut EnumRecord> {
        match &mut self.body {
            DescriptorBody::Enum(e) => Some(e),
            DescriptorBody::Message(_) => None,
        }
    }

    /// Returns true if this record is a synthesized map entry message.
    pub fn is_map_entry(&self) -> bool {
        self.as_message().is_some_and(|m| m.is_map_entry)
    }
}

/// A single "field F of message R references target T" edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferrerEdge {
    /// Name of the referencing field inside the referrer
    pub field: String,
    /// Pool path of the referencing message
    pub referrer: String,
    /// True if the reference comes from a group field
    pub is_group: bool,
}

impl ReferrerEdge {
    /// Creates a new edge.
    pub fn new(field: impl Into<String>, referrer: impl Into<String>, is_group: bool) -> Self {
        Self {
            field: field.into(),
            referrer: referrer.into(),
            is_group,
        }
    }
}

/// Reference edges between pool records, keyed by target path.
///
/// Both the target order and the per-target edge order follow insertion,
/// which makes every resolver decision that scans this table
/// deterministic.
#[derive(Debug, Clone, Default)]
pub struct ReferrerTable {
    edges: IndexMap<String, Vec<ReferrerEdge>>,
}

impl ReferrerTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `edge.referrer` references `target` through `edge.field`.
    pub fn add(&mut self, target: impl Into<String>, edge: ReferrerEdge) {
        self.edges.entry(target.into()).or_default().push(edge);
    }

    /// Returns the edges pointing at `target`, in insertion order.
    pub fn get(&self, target: &str) -> Option<&[ReferrerEdge]> {
        self.edges.get(target).map(Vec::as_slice)
    }

    /// Removes and returns the edges for `target`, keeping the order of
    /// the remaining entries intact.
    pub fn remove(&mut self, target: &str) -> Option<Vec<ReferrerEdge>> {
        self.edges.shift_remove(target)
    }

    /// Iterates over target paths in insertion order.
    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.edges.keys().map(String::as_str)
    }

    /// Returns the number of distinct targets.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Returns true if no edges have been recorded.
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

/// Insertion-ordered arena of all recovered messages and enums.
#[derive(Debug, Clone, Default)]
pub struct DescriptorPool {
    records: IndexMap<String, DescriptorRecord>,
}

impl DescriptorPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `record` under `path`.
    ///
    /// Fails if `path` is already present, or if any field or extension
    /// of the record carries a field number outside `1..=MAX_FIELD_NUMBER`.
    pub fn insert(&mut self, path: impl Into<String>, record: DescriptorRecord) -> Result<()> {
        let path = path.into();
        if self.records.contains_key(&path) {
            return Err(Error::duplicate_path(path));
        }
        if let Some(message) = record.as_message() {
            for field in message.fields.iter().chain(&message.extensions) {
                if field.number == 0 || field.number > MAX_FIELD_NUMBER {
                    return Err(Error::InvalidFieldNumber {
                        number: field.number,
                        max: MAX_FIELD_NUMBER,
                    });
                }
            }
        }
        self.records.insert(path, record);
        Ok(())
    }

    /// Returns the record at `path`.
    pub fn get(&self, path: &str) -> Option<&DescriptorRecord> {
        self.records.get(path)
    }

    /// Returns the mutable record at `path`.
    pub fn get_mut(&mut self, path: &str) -> Option<&mut DescriptorRecord> {
        self.records.get_mut(path)
    }

    /// Returns true if `path` is registered.
    pub fn contains(&self, path: &str) -> bool {
        self.records.contains_key(path)
    }

    /// Iterates over pool paths in insertion order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    /// Iterates over `(path, record)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &DescriptorRecord)> {
        self.records.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the pool holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Proto syntax version of a schema file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtoSyntax {
    /// Protocol Buffers version 2 (the default when unspecified)
    #[default]
    Proto2,
    /// Protocol Buffers version 3
    Proto3,
}

impl ProtoSyntax {
    /// Returns the syntax string used in `.proto` files.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtoSyntax::Proto2 => "proto2",
            ProtoSyntax::Proto3 => "proto3",
        }
    }
}

impl TryFrom<&str> for ProtoSyntax {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        match value {
            "proto2" | "" => Ok(ProtoSyntax::Proto2),
            "proto3" => Ok(ProtoSyntax::Proto3),
            other => Err(Error::UnsupportedSyntax {
                syntax: other.to_string(),
            }),
        }
    }
}

/// A single RPC method of a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodRecord {
    /// Method name
    pub name: String,
    /// Fully qualified request type
    pub input_type: String,
    /// Fully qualified response type
    pub output_type: String,
    /// True if the client streams requests
    pub client_streaming: bool,
    /// True if the server streams responses
    pub server_streaming: bool,
}

/// A service definition.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServiceRecord {
    /// Service name
    pub name: String,
    /// Methods in declaration order
    pub methods: Vec<MethodRecord>,
}

/// Everything needed to render one `.proto` file.
///
/// Message and enum definitions are referenced by pool path rather than
/// stored inline, so a schema is always paired with the pool it was
/// built against.
#[derive(Debug, Clone, PartialEq)]
pub struct FileSchema {
    /// Relative output path, such as `com/app/Service.proto`
    pub name: String,
    /// Syntax version
    pub syntax: ProtoSyntax,
    /// Package declaration, empty for no package
    pub package: String,
    /// Imported file paths in declaration order
    pub dependencies: Vec<String>,
    /// Indices into `dependencies` that are public imports
    pub public_dependencies: Vec<usize>,
    /// Indices into `dependencies` that are weak imports
    pub weak_dependencies: Vec<usize>,
    /// File-level options as `(name, formatted value)` pairs
    pub options: Vec<(String, String)>,
    /// Service definitions
    pub services: Vec<ServiceRecord>,
    /// Pool paths of top-level messages and enums, in declaration order
    pub top_level: Vec<String>,
    /// File-level extension fields
    pub extensions: Vec<FieldRecord>,
}

impl FileSchema {
    /// Creates an empty schema for `name`.
    pub fn new(name: impl Into<String>, syntax: ProtoSyntax) -> Self {
        Self {
            name: name.into(),
            syntax,
            package: String::new(),
            dependencies: Vec::new(),
            public_dependencies: Vec::new(),
            weak_dependencies: Vec::new(),
            options: Vec::new(),
            services: Vec::new(),
            top_level: Vec::new(),
            extensions: Vec::new(),
        }
    }
}

/// A schema together with the pool holding its type definitions.
#[derive(Debug, Clone)]
pub struct SchemaFile {
    /// The renderable file
    pub file: FileSchema,
    /// Pool containing every record the file references
    pub pool: DescriptorPool,
}

/// Returns the package of a pool path: everything before the last dot.
pub fn package_of(path: &str) -> &str {
    match path.rsplit_once('.') {
        Some((package, _)) => package,
        None => "",
    }
}

/// Derives the output file path for a pool path.
///
/// The `$`-root of the path maps to a file, so producer-nested records
/// land in the same file as their source-level container:
/// `com.app.Outer$Inner` becomes `com/app/Outer.proto`.
pub fn file_path_of(path: &str) -> String {
    let root = path.split(NESTED_SEPARATOR).next().unwrap_or(path);
    let mut file = root.replace('.', "/");
    file.push_str(".proto");
    file
}

/// Strips path traversal components from a descriptor file name.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned = name.replace("..", "");
    cleaned.trim_matches(['.', '/', '\\']).to_string()
}

/// Flags a raw descriptor file name whose unsanitized form would escape
/// the output directory.
///
/// [`sanitize_file_name`] strips the offending components silently;
/// callers use this to report the rewrite.
pub fn check_file_name(name: &str) -> Result<()> {
    if name.contains("..") || name.starts_with('/') || name.starts_with('\\') {
        return Err(Error::path_traversal(name));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_preserves_order() {
        let mut pool = DescriptorPool::new();
        pool.insert("b.Zeta", DescriptorRecord::message("Zeta")).unwrap();
        pool.insert("a.Alpha", DescriptorRecord::message("Alpha")).unwrap();
        pool.insert("b.Zeta$Inner", DescriptorRecord::enumeration("Inner"))
            .unwrap();

        let paths: Vec<&str> = pool.paths().collect();
        assert_eq!(paths, vec!["b.Zeta", "a.Alpha", "b.Zeta$Inner"]);
    }

    #[test]
    fn test_duplicate_path_rejected() {
        let mut pool = DescriptorPool::new();
        pool.insert("a.Msg", DescriptorRecord::message("Msg")).unwrap();
        let err = pool
            .insert("a.Msg", DescriptorRecord::message("Msg"))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicatePath { .. }));
    }

    #[test]
    fn test_invalid_field_number_rejected() {
        let mut record = DescriptorRecord::message("Msg");
        record
            .as_message_mut()
            .unwrap()
            .fields
            .push(FieldRecord::new(0, "bad", FieldType::Int32, FieldLabel::Optional));

        let mut pool = DescriptorPool::new();
        let err = pool.insert("a.Msg", record).unwrap_err();
        assert!(matches!(err, Error::InvalidFieldNumber { number: 0, .. }));
    }

    #[test]
    fn test_field_number_ceiling() {
        let mut record = DescriptorRecord::message("Msg");
        record.as_message_mut().unwrap().fields.push(FieldRecord::new(
            MAX_FIELD_NUMBER,
            "last",
            FieldType::Bool,
            FieldLabel::Optional,
        ));

        let mut pool = DescriptorPool::new();
        assert!(pool.insert("a.Msg", record).is_ok());
    }

    #[test]
    fn test_referrer_table_order() {
        let mut table = ReferrerTable::new();
        table.add("a.Target", ReferrerEdge::new("f1", "a.One", false));
        table.add("a.Other", ReferrerEdge::new("f2", "a.Two", true));
        table.add("a.Target", ReferrerEdge::new("f3", "a.Three", false));

        let targets: Vec<&str> = table.targets().collect();
        assert_eq!(targets, vec!["a.Target", "a.Other"]);
        assert_eq!(table.get("a.Target").unwrap().len(), 2);

        table.remove("a.Target");
        let targets: Vec<&str> = table.targets().collect();
        assert_eq!(targets, vec!["a.Other"]);
    }

    #[test]
    fn test_package_of() {
        assert_eq!(package_of("com.app.Msg"), "com.app");
        assert_eq!(package_of("Msg"), "");
        assert_eq!(package_of("com.app.Outer$Inner"), "com.app");
    }

    #[test]
    fn test_file_path_of() {
        assert_eq!(file_path_of("com.app.Msg"), "com/app/Msg.proto");
        assert_eq!(file_path_of("com.app.Outer$Inner"), "com/app/Outer.proto");
        assert_eq!(file_path_of("Bare"), "Bare.proto");
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("app/service.proto"), "app/service.proto");
        assert_eq!(sanitize_file_name("../../etc/evil.proto"), "etc/evil.proto");
        assert_eq!(sanitize_file_name("/absolute/path.proto"), "absolute/path.proto");
    }

    #[test]
    fn test_check_file_name_flags_traversal() {
        assert!(check_file_name("app/service.proto").is_ok());
        let err = check_file_name("../../etc/evil.proto").unwrap_err();
        assert!(matches!(err, Error::PathTraversal { .. }));
        assert!(check_file_name("/absolute/path.proto").is_err());
        assert!(check_file_name("\\absolute\\path.proto").is_err());
    }

    #[test]
    fn test_syntax_parsing() {
        assert_eq!(ProtoSyntax::try_from("proto2").unwrap(), ProtoSyntax::Proto2);
        assert_eq!(ProtoSyntax::try_from("proto3").unwrap(), ProtoSyntax::Proto3);
        assert_eq!(ProtoSyntax::try_from("").unwrap(), ProtoSyntax::Proto2);
        assert!(ProtoSyntax::try_from("proto4").is_err());
    }
}
