//! Descriptor fixtures for tests.
//!
//! Builds a small schema in code: `google/api/httpbody.proto` and a greeter
//! service whose methods carry `google.api.http` options. `prost-types`
//! drops extension fields from `MethodOptions`, so the service is encoded
//! separately with raw option bytes and appended to the file.

use std::sync::OnceLock;

use prost::Message;
use prost::encoding::{WireType, encode_key, encode_varint};
use prost_reflect::{DescriptorPool, MessageDescriptor, MethodDescriptor};
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
    FileDescriptorProto, MessageOptions,
};

use crate::http_rule::{HTTP_RULE_EXTENSION_NUMBER, HttpRule};

pub const HTTP_BODY_FILE: &str = "google/api/httpbody.proto";
pub const GREETER_FILE: &str = "transcoding/v1/greeter.proto";
pub const GREETER_SERVICE: &str = "transcoding.v1.Greeter";

#[derive(Clone, PartialEq, Message)]
struct AnnotatedService {
    #[prost(string, tag = "1")]
    name: String,
    #[prost(message, repeated, tag = "2")]
    method: Vec<AnnotatedMethod>,
}

#[derive(Clone, PartialEq, Message)]
struct AnnotatedMethod {
    #[prost(string, tag = "1")]
    name: String,
    #[prost(string, tag = "2")]
    input_type: String,
    #[prost(string, tag = "3")]
    output_type: String,
    #[prost(bytes = "vec", optional, tag = "4")]
    options: Option<Vec<u8>>,
    #[prost(bool, tag = "6")]
    server_streaming: bool,
}

/// The shared test pool.
pub fn descriptor_pool() -> DescriptorPool {
    static POOL: OnceLock<DescriptorPool> = OnceLock::new();
    POOL.get_or_init(build_pool).clone()
}

pub fn message(name: &str) -> MessageDescriptor {
    descriptor_pool()
        .get_message_by_name(name)
        .unwrap_or_else(|| panic!("missing message {name}"))
}

pub fn method(name: &str) -> MethodDescriptor {
    descriptor_pool()
        .get_service_by_name(GREETER_SERVICE)
        .unwrap()
        .methods()
        .find(|m| m.name() == name)
        .unwrap_or_else(|| panic!("missing method {name}"))
}

fn build_pool() -> DescriptorPool {
    let mut set = Vec::new();
    for file in [http_body_file().encode_to_vec(), greeter_file()] {
        encode_key(1, WireType::LengthDelimited, &mut set);
        encode_varint(file.len() as u64, &mut set);
        set.extend_from_slice(&file);
    }
    DescriptorPool::decode(set.as_slice()).expect("valid descriptor set")
}

fn http_body_file() -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some(HTTP_BODY_FILE.to_string()),
        package: Some("google.api".to_string()),
        message_type: vec![DescriptorProto {
            name: Some("HttpBody".to_string()),
            field: vec![
                field("content_type", 1, Type::String),
                field("data", 2, Type::Bytes),
            ],
            ..Default::default()
        }],
        syntax: Some("proto3".to_string()),
        ..Default::default()
    }
}

fn greeter_file() -> Vec<u8> {
    let file = FileDescriptorProto {
        name: Some(GREETER_FILE.to_string()),
        package: Some("transcoding.v1".to_string()),
        dependency: vec![HTTP_BODY_FILE.to_string()],
        message_type: vec![
            hello_request(),
            hello_reply(),
            DescriptorProto {
                name: Some("UploadRequest".to_string()),
                field: vec![
                    field("name", 1, Type::String),
                    message_field("body", 2, ".google.api.HttpBody"),
                ],
                ..Default::default()
            },
            DescriptorProto {
                name: Some("TreeNode".to_string()),
                field: vec![
                    field("name", 1, Type::String),
                    repeated(message_field("children", 2, ".transcoding.v1.TreeNode")),
                ],
                ..Default::default()
            },
        ],
        syntax: Some("proto3".to_string()),
        ..Default::default()
    };

    let request = ".transcoding.v1.HelloRequest";
    let reply = ".transcoding.v1.HelloReply";
    let http_body = ".google.api.HttpBody";
    let upload = ".transcoding.v1.UploadRequest";

    let service = AnnotatedService {
        name: "Greeter".to_string(),
        method: vec![
            annotated(
                "SayHello",
                request,
                reply,
                Some(
                    HttpRule::get("/v1/greeter/{name}")
                        .with_additional_binding(HttpRule::get("/v1/hello/{name}")),
                ),
            ),
            annotated(
                "SayHelloPost",
                request,
                reply,
                Some(HttpRule::post("/v1/greeter").with_body("*")),
            ),
            annotated(
                "SayHelloSub",
                request,
                reply,
                Some(HttpRule::post("/v1/greeter/{name}/sub").with_body("sub")),
            ),
            annotated(
                "SayHelloRepeated",
                request,
                reply,
                Some(HttpRule::post("/v1/greeter/{name}/strings").with_body("repeated_strings")),
            ),
            annotated(
                "SayHelloMap",
                request,
                reply,
                Some(HttpRule::post("/v1/greeter/{name}/map").with_body("map_strings")),
            ),
            annotated(
                "GetShelfBook",
                request,
                reply,
                Some(HttpRule::get("/v1/{name=shelves/*/books/*}")),
            ),
            annotated(
                "SayHelloNested",
                request,
                reply,
                Some(HttpRule::get("/v1/greeter/{name}/{sub.subfield}")),
            ),
            annotated(
                "SayHelloMessage",
                request,
                reply,
                Some(HttpRule::get("/v1/reply/{name}").with_response_body("message")),
            ),
            annotated(
                "SayHelloNestedReply",
                request,
                reply,
                Some(HttpRule::get("/v1/nested/{name}").with_response_body("nested")),
            ),
            annotated(
                "SayHelloValues",
                request,
                reply,
                Some(HttpRule::get("/v1/values/{name}").with_response_body("values")),
            ),
            annotated(
                "Download",
                request,
                http_body,
                Some(HttpRule::get("/v1/download/{name}")),
            ),
            annotated(
                "Upload",
                upload,
                reply,
                Some(HttpRule::post("/v1/upload/{name}").with_body("body")),
            ),
            annotated(
                "UploadRaw",
                http_body,
                reply,
                Some(HttpRule::post("/v1/raw").with_body("*")),
            ),
            AnnotatedMethod {
                server_streaming: true,
                ..annotated(
                    "StreamHellos",
                    request,
                    reply,
                    Some(HttpRule::get("/v1/stream/{name}")),
                )
            },
            annotated(
                "CancelHello",
                request,
                reply,
                Some(HttpRule::post("/v1/greeter/{name}:cancel").with_body("*")),
            ),
            annotated("Unannotated", request, reply, None),
        ],
    };

    let mut bytes = file.encode_to_vec();
    prost::encoding::message::encode(6, &service, &mut bytes);
    bytes
}

fn annotated(name: &str, input: &str, output: &str, rule: Option<HttpRule>) -> AnnotatedMethod {
    let options = rule.map(|rule| {
        let mut options = Vec::new();
        prost::encoding::message::encode(HTTP_RULE_EXTENSION_NUMBER, &rule, &mut options);
        options
    });

    AnnotatedMethod {
        name: name.to_string(),
        input_type: input.to_string(),
        output_type: output.to_string(),
        options,
        server_streaming: false,
    }
}

fn hello_request() -> DescriptorProto {
    let nested_enum = EnumDescriptorProto {
        name: Some("NestedEnum".to_string()),
        value: [("NESTED_ENUM_UNSPECIFIED", 0), ("FOO", 1), ("BAR", 2), ("NEG", -1)]
            .into_iter()
            .map(|(name, number)| EnumValueDescriptorProto {
                name: Some(name.to_string()),
                number: Some(number),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    };

    let sub_message = DescriptorProto {
        name: Some("SubMessage".to_string()),
        field: vec![
            field("subfield", 1, Type::String),
            repeated(field("subfields", 2, Type::String)),
        ],
        ..Default::default()
    };

    let enum_type = ".transcoding.v1.HelloRequest.NestedEnum";
    let data_types = DescriptorProto {
        name: Some("DataTypes".to_string()),
        field: vec![
            field("single_int32", 1, Type::Int32),
            field("single_int64", 2, Type::Int64),
            field("single_uint32", 3, Type::Uint32),
            field("single_uint64", 4, Type::Uint64),
            field("single_sint32", 5, Type::Sint32),
            field("single_sint64", 6, Type::Sint64),
            field("single_fixed32", 7, Type::Fixed32),
            field("single_fixed64", 8, Type::Fixed64),
            field("single_sfixed32", 9, Type::Sfixed32),
            field("single_sfixed64", 10, Type::Sfixed64),
            field("single_float", 11, Type::Float),
            field("single_double", 12, Type::Double),
            field("single_bool", 13, Type::Bool),
            field("single_string", 14, Type::String),
            field("single_bytes", 15, Type::Bytes),
            typed_field("single_enum", 16, Type::Enum, enum_type),
            repeated(field("repeated_int32", 17, Type::Int32)),
            repeated(typed_field("repeated_enum", 18, Type::Enum, enum_type)),
        ],
        ..Default::default()
    };

    let map_entry = DescriptorProto {
        name: Some("MapStringsEntry".to_string()),
        field: vec![field("key", 1, Type::String), field("value", 2, Type::String)],
        options: Some(MessageOptions {
            map_entry: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    };

    DescriptorProto {
        name: Some("HelloRequest".to_string()),
        field: vec![
            field("name", 1, Type::String),
            message_field("sub", 2, ".transcoding.v1.HelloRequest.SubMessage"),
            message_field("data", 3, ".transcoding.v1.HelloRequest.DataTypes"),
            repeated(field("repeated_strings", 4, Type::String)),
            repeated(message_field(
                "map_strings",
                5,
                ".transcoding.v1.HelloRequest.MapStringsEntry",
            )),
            field("field_name", 6, Type::String),
            with_json_name(field("hidden_field", 7, Type::String), "field_name"),
        ],
        nested_type: vec![sub_message, data_types, map_entry],
        enum_type: vec![nested_enum],
        ..Default::default()
    }
}

fn hello_reply() -> DescriptorProto {
    DescriptorProto {
        name: Some("HelloReply".to_string()),
        field: vec![
            field("message", 1, Type::String),
            repeated(field("values", 2, Type::String)),
            message_field("nested", 3, ".transcoding.v1.HelloRequest.SubMessage"),
        ],
        ..Default::default()
    }
}

fn field(name: &str, number: i32, ty: Type) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(ty as i32),
        json_name: Some(json_name(name)),
        ..Default::default()
    }
}

fn typed_field(name: &str, number: i32, ty: Type, type_name: &str) -> FieldDescriptorProto {
    FieldDescriptorProto {
        type_name: Some(type_name.to_string()),
        ..field(name, number, ty)
    }
}

fn message_field(name: &str, number: i32, type_name: &str) -> FieldDescriptorProto {
    typed_field(name, number, Type::Message, type_name)
}

fn repeated(mut field: FieldDescriptorProto) -> FieldDescriptorProto {
    field.label = Some(Label::Repeated as i32);
    field
}

fn with_json_name(mut field: FieldDescriptorProto, json_name: &str) -> FieldDescriptorProto {
    field.json_name = Some(json_name.to_string());
    field
}

fn json_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len());
    let mut upper = false;
    for c in name.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            result.push(c.to_ascii_uppercase());
            upper = false;
        } else {
            result.push(c);
        }
    }
    result
}
