//! Conversion of parsed `FileDescriptorProto` messages into pool records.
//!
//! This is the bridge between descriptors recovered verbatim from a
//! binary and the pool/schema model the renderer consumes. Nesting in a
//! compiled descriptor is real, so records are registered under plain
//! dot-separated paths and no referrer edges are needed.

use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, FieldDescriptorProto, FileDescriptorProto,
    OneofDescriptorProto, ServiceDescriptorProto,
};
use tracing::debug;

use crate::error::{Error, Result};
use crate::pool::{
    sanitize_file_name, DescriptorBody, DescriptorPool, DescriptorRecord, EnumRecord,
    EnumValueRecord, FieldLabel, FieldRecord, FieldType, FileSchema, MessageRecord, MethodRecord,
    NumberRange, ProtoSyntax, SchemaFile, ServiceRecord,
};
use crate::render::escape_string;
use crate::MAX_FIELD_NUMBER;

/// Builds a renderable schema from a parsed file descriptor.
///
/// Unknown syntax strings fall back to proto2, matching the descriptor
/// format's own default.
pub fn from_file_descriptor(descriptor: &FileDescriptorProto) -> Result<SchemaFile> {
    let syntax = ProtoSyntax::try_from(descriptor.syntax()).unwrap_or_default();
    let mut file = FileSchema::new(sanitize_file_name(descriptor.name()), syntax);
    file.package = descriptor.package().to_string();
    file.dependencies = descriptor.dependency.clone();
    file.public_dependencies = descriptor
        .public_dependency
        .iter()
        .map(|&i| i as usize)
        .collect();
    file.weak_dependencies = descriptor
        .weak_dependency
        .iter()
        .map(|&i| i as usize)
        .collect();
    if let Some(options) = &descriptor.options {
        file.options = file_options(options);
    }

    debug!(
        "converting '{}': {} messages, {} enums, {} services",
        descriptor.name(),
        descriptor.message_type.len(),
        descriptor.enum_type.len(),
        descriptor.service.len()
    );

    let mut pool = DescriptorPool::new();
    let scope = descriptor.package();
    for message in &descriptor.message_type {
        let path = insert_message(&mut pool, scope, message)?;
        file.top_level.push(path);
    }
    for enumeration in &descriptor.enum_type {
        let path = insert_enum(&mut pool, scope, enumeration)?;
        file.top_level.push(path);
    }
    for service in &descriptor.service {
        file.services.push(convert_service(service));
    }
    for extension in &descriptor.extension {
        let field = convert_field(extension, &[]);
        // file-level extensions bypass pool insertion and its number check
        if field.number == 0 || field.number > MAX_FIELD_NUMBER {
            return Err(Error::InvalidFieldNumber {
                number: field.number,
                max: MAX_FIELD_NUMBER,
            });
        }
        file.extensions.push(field);
    }

    Ok(SchemaFile { file, pool })
}

fn join_path(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", scope, name)
    }
}

fn insert_message(
    pool: &mut DescriptorPool,
    scope: &str,
    proto: &DescriptorProto,
) -> Result<String> {
    let path = join_path(scope, proto.name());

    let mut message = MessageRecord {
        is_map_entry: proto.options.as_ref().is_some_and(|o| o.map_entry()),
        ..MessageRecord::default()
    };
    for field in &proto.field {
        message.fields.push(convert_field(field, &proto.oneof_decl));
    }
    message.oneofs = proto.oneof_decl.iter().map(|o| o.name().to_string()).collect();
    for extension in &proto.extension {
        message
            .extensions
            .push(convert_field(extension, &proto.oneof_decl));
    }
    message.extension_ranges = proto
        .extension_range
        .iter()
        .map(|r| NumberRange::new(r.start(), r.end()))
        .collect();
    message.reserved_ranges = proto
        .reserved_range
        .iter()
        .map(|r| NumberRange::new(r.start(), r.end()))
        .collect();
    message.reserved_names = proto.reserved_name.clone();

    for nested in &proto.nested_type {
        message.nested.push(insert_message(pool, &path, nested)?);
    }
    for nested in &proto.enum_type {
        message.nested.push(insert_enum(pool, &path, nested)?);
    }

    let record = DescriptorRecord {
        name: proto.name().to_string(),
        body: DescriptorBody::Message(message),
    };
    pool.insert(path.clone(), record)?;
    Ok(path)
}

fn insert_enum(
    pool: &mut DescriptorPool,
    scope: &str,
    proto: &EnumDescriptorProto,
) -> Result<String> {
    let path = join_path(scope, proto.name());

    let enumeration = EnumRecord {
        values: proto
            .value
            .iter()
            .map(|v| EnumValueRecord::new(v.name(), v.number()))
            .collect(),
        reserved_ranges: proto
            .reserved_range
            .iter()
            .map(|r| NumberRange::new(r.start(), r.end()))
            .collect(),
        reserved_names: proto.reserved_name.clone(),
    };

    let record = DescriptorRecord {
        name: proto.name().to_string(),
        body: DescriptorBody::Enum(enumeration),
    };
    pool.insert(path.clone(), record)?;
    Ok(path)
}

fn convert_field(proto: &FieldDescriptorProto, oneofs: &[OneofDescriptorProto]) -> FieldRecord {
    let mut field = FieldRecord::new(
        proto.number() as u32,
        proto.name(),
        convert_type(proto.r#type()),
        convert_label(proto.label()),
    );
    if !proto.type_name().is_empty() {
        field.type_ref = Some(proto.type_name().trim_start_matches('.').to_string());
    }
    if let Some(value) = &proto.default_value {
        field.default_value = Some(value.clone());
    }
    field.proto3_optional = proto.proto3_optional();
    if let Some(index) = proto.oneof_index {
        // proto3 synthetic oneofs only model explicit presence; the oneof
        // itself is dropped, the `optional` label survives
        let synthetic = field.proto3_optional
            || oneofs
                .get(index as usize)
                .is_some_and(|o| o.name().starts_with('_'));
        if synthetic {
            field.proto3_optional = true;
        } else {
            field.oneof_index = Some(index as u32);
        }
    }
    if !proto.extendee().is_empty() {
        field.extendee = Some(proto.extendee().trim_start_matches('.').to_string());
    }
    field
}

fn convert_type(value: Type) -> FieldType {
    match value {
        Type::Double => FieldType::Double,
        Type::Float => FieldType::Float,
        Type::Int64 => FieldType::Int64,
        Type::Uint64 => FieldType::Uint64,
        Type::Int32 => FieldType::Int32,
        Type::Fixed64 => FieldType::Fixed64,
        Type::Fixed32 => FieldType::Fixed32,
        Type::Bool => FieldType::Bool,
        Type::String => FieldType::String,
        Type::Group => FieldType::Group,
        Type::Message => FieldType::Message,
        Type::Bytes => FieldType::Bytes,
        Type::Uint32 => FieldType::Uint32,
        Type::Enum => FieldType::Enum,
        Type::Sfixed32 => FieldType::Sfixed32,
        Type::Sfixed64 => FieldType::Sfixed64,
        Type::Sint32 => FieldType::Sint32,
        Type::Sint64 => FieldType::Sint64,
    }
}

fn convert_label(value: Label) -> FieldLabel {
    match value {
        Label::Optional => FieldLabel::Optional,
        Label::Required => FieldLabel::Required,
        Label::Repeated => FieldLabel::Repeated,
    }
}

fn convert_service(proto: &ServiceDescriptorProto) -> ServiceRecord {
    ServiceRecord {
        name: proto.name().to_string(),
        methods: proto
            .method
            .iter()
            .map(|m| MethodRecord {
                name: m.name().to_string(),
                input_type: m.input_type().trim_start_matches('.').to_string(),
                output_type: m.output_type().trim_start_matches('.').to_string(),
                client_streaming: m.client_streaming(),
                server_streaming: m.server_streaming(),
            })
            .collect(),
    }
}

fn file_options(options: &prost_types::FileOptions) -> Vec<(String, String)> {
    let mut out = Vec::new();

    macro_rules! string_option {
        ($field:ident) => {
            if let Some(value) = &options.$field {
                out.push((
                    stringify!($field).to_string(),
                    format!("\"{}\"", escape_string(value)),
                ));
            }
        };
    }
    macro_rules! bool_option {
        ($field:ident) => {
            if let Some(value) = options.$field {
                out.push((stringify!($field).to_string(), value.to_string()));
            }
        };
    }

    string_option!(java_package);
    string_option!(java_outer_classname);
    if let Some(value) = options.optimize_for {
        if let Ok(mode) = prost_types::file_options::OptimizeMode::try_from(value) {
            out.push(("optimize_for".to_string(), mode.as_str_name().to_string()));
        }
    }
    bool_option!(java_multiple_files);
    string_option!(go_package);
    bool_option!(java_string_check_utf8);
    bool_option!(cc_enable_arenas);
    string_option!(objc_class_prefix);
    string_option!(csharp_namespace);
    string_option!(swift_prefix);
    string_option!(php_class_prefix);
    string_option!(php_namespace);
    string_option!(php_metadata_namespace);
    string_option!(ruby_package);

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, number: i32, ty: Type) -> FieldDescriptorProto {
        FieldDescriptorProto {
            name: Some(name.to_string()),
            number: Some(number),
            label: Some(Label::Optional as i32),
            r#type: Some(ty as i32),
            ..FieldDescriptorProto::default()
        }
    }

    fn sample_descriptor() -> FileDescriptorProto {
        let inner_enum = EnumDescriptorProto {
            name: Some("Kind".to_string()),
            value: vec![
                prost_types::EnumValueDescriptorProto {
                    name: Some("KIND_A".to_string()),
                    number: Some(0),
                    ..Default::default()
                },
                prost_types::EnumValueDescriptorProto {
                    name: Some("KIND_B".to_string()),
                    number: Some(1),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let inner = DescriptorProto {
            name: Some("Inner".to_string()),
            field: vec![field("value", 1, Type::String)],
            ..Default::default()
        };
        let outer = DescriptorProto {
            name: Some("Outer".to_string()),
            field: vec![
                field("id", 1, Type::Int32),
                FieldDescriptorProto {
                    type_name: Some(".com.app.Outer.Inner".to_string()),
                    ..field("inner", 2, Type::Message)
                },
            ],
            nested_type: vec![inner],
            enum_type: vec![inner_enum],
            ..Default::default()
        };

        FileDescriptorProto {
            name: Some("com/app/outer.proto".to_string()),
            package: Some("com.app".to_string()),
            syntax: Some("proto3".to_string()),
            message_type: vec![outer],
            ..Default::default()
        }
    }

    #[test]
    fn test_pool_paths_and_order() {
        let schema = from_file_descriptor(&sample_descriptor()).unwrap();
        let paths: Vec<&str> = schema.pool.paths().collect();
        assert_eq!(
            paths,
            vec!["com.app.Outer.Inner", "com.app.Outer.Kind", "com.app.Outer"]
        );
        assert_eq!(schema.file.top_level, vec!["com.app.Outer"]);
        assert_eq!(schema.file.package, "com.app");
        assert_eq!(schema.file.syntax, ProtoSyntax::Proto3);
    }

    #[test]
    fn test_type_reference_trimmed() {
        let schema = from_file_descriptor(&sample_descriptor()).unwrap();
        let outer = schema.pool.get("com.app.Outer").unwrap();
        let inner_field = &outer.as_message().unwrap().fields[1];
        assert_eq!(inner_field.type_ref.as_deref(), Some("com.app.Outer.Inner"));
    }

    #[test]
    fn test_nested_order_preserved() {
        let schema = from_file_descriptor(&sample_descriptor()).unwrap();
        let outer = schema.pool.get("com.app.Outer").unwrap();
        assert_eq!(
            outer.as_message().unwrap().nested,
            vec!["com.app.Outer.Inner", "com.app.Outer.Kind"]
        );
    }

    #[test]
    fn test_synthetic_oneof_dropped() {
        let mut descriptor = sample_descriptor();
        let message = &mut descriptor.message_type[0];
        message.oneof_decl = vec![
            OneofDescriptorProto {
                name: Some("choice".to_string()),
                ..Default::default()
            },
            OneofDescriptorProto {
                name: Some("_maybe".to_string()),
                ..Default::default()
            },
        ];
        message.field[0].oneof_index = Some(0);
        message.field[1].oneof_index = Some(1);

        let schema = from_file_descriptor(&descriptor).unwrap();
        let outer = schema.pool.get("com.app.Outer").unwrap();
        let fields = &outer.as_message().unwrap().fields;
        assert_eq!(fields[0].oneof_index, Some(0));
        assert!(!fields[0].proto3_optional);
        assert_eq!(fields[1].oneof_index, None);
        assert!(fields[1].proto3_optional);
    }

    #[test]
    fn test_proto3_optional_keeps_explicit_presence() {
        let message = DescriptorProto {
            name: Some("User".to_string()),
            field: vec![FieldDescriptorProto {
                oneof_index: Some(0),
                proto3_optional: Some(true),
                ..field("nickname", 1, Type::String)
            }],
            oneof_decl: vec![OneofDescriptorProto {
                name: Some("_nickname".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let descriptor = FileDescriptorProto {
            name: Some("user.proto".to_string()),
            syntax: Some("proto3".to_string()),
            message_type: vec![message],
            ..Default::default()
        };

        let schema = from_file_descriptor(&descriptor).unwrap();
        let text = crate::render::ProtoRenderer::new()
            .render_file(&schema.file, &schema.pool)
            .unwrap();
        assert_eq!(
            text,
            "syntax = \"proto3\";\n\nmessage User {\n    optional string nickname = 1;\n}\n"
        );
    }

    #[test]
    fn test_file_extension_number_validated() {
        let mut descriptor = sample_descriptor();
        descriptor.extension = vec![FieldDescriptorProto {
            extendee: Some(".com.app.Outer".to_string()),
            ..field("bad", 0, Type::Int32)
        }];

        let err = from_file_descriptor(&descriptor).unwrap_err();
        assert!(matches!(err, Error::InvalidFieldNumber { number: 0, .. }));
    }

    #[test]
    fn test_map_entry_flag() {
        let mut descriptor = sample_descriptor();
        descriptor.message_type[0].nested_type[0].options = Some(prost_types::MessageOptions {
            map_entry: Some(true),
            ..Default::default()
        });

        let schema = from_file_descriptor(&descriptor).unwrap();
        assert!(schema.pool.get("com.app.Outer.Inner").unwrap().is_map_entry());
    }

    #[test]
    fn test_file_options_formatted() {
        let mut descriptor = sample_descriptor();
        descriptor.options = Some(prost_types::FileOptions {
            java_package: Some("com.app.protos".to_string()),
            java_multiple_files: Some(true),
            ..Default::default()
        });

        let schema = from_file_descriptor(&descriptor).unwrap();
        assert_eq!(
            schema.file.options,
            vec![
                ("java_package".to_string(), "\"com.app.protos\"".to_string()),
                ("java_multiple_files".to_string(), "true".to_string()),
            ]
        );
    }

    #[test]
    fn test_file_name_sanitized() {
        let mut descriptor = sample_descriptor();
        descriptor.name = Some("../../escape.proto".to_string());
        let schema = from_file_descriptor(&descriptor).unwrap();
        assert_eq!(schema.file.name, "escape.proto");
    }
}
