//! Build script for a3s-agent-core
//!
//! Generates the wire messages from the proto definitions and adds the serde
//! attributes that give every message its JSON form.

use std::path::PathBuf;
use std::process::Command;

use prost::Message;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{DescriptorProto, FileDescriptorSet};

const PROTOS: &[&str] = &[
    "proto/mesos.proto",
    "proto/agent.proto",
    "proto/executor.proto",
];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    for proto in PROTOS {
        println!("cargo:rerun-if-changed={}", proto);
    }

    let mut config = prost_build::Config::new();
    config.type_attribute(".", "#[derive(::serde::Serialize, ::serde::Deserialize)]");
    config.type_attribute(".mesos.ContainerID", "#[derive(Eq, Hash)]");

    for file in load_descriptors()?.file {
        let package = format!(".{}", file.package());
        for message in &file.message_type {
            annotate_message(&mut config, &package, message);
        }
    }

    config.compile_protos(PROTOS, &["proto"])?;

    Ok(())
}

/// Runs protoc once to read the message layout.
fn load_descriptors() -> Result<FileDescriptorSet, Box<dyn std::error::Error>> {
    let out_dir = PathBuf::from(std::env::var("OUT_DIR")?);
    let descriptor_path = out_dir.join("wire_descriptor.bin");

    let status = Command::new(prost_build::protoc_from_env())
        .arg("--proto_path=proto")
        .arg("--include_imports")
        .arg(format!("--descriptor_set_out={}", descriptor_path.display()))
        .args(PROTOS)
        .status()?;
    if !status.success() {
        return Err(format!("protoc failed: {}", status).into());
    }

    let bytes = std::fs::read(&descriptor_path)?;
    Ok(FileDescriptorSet::decode(bytes.as_slice())?)
}

fn annotate_message(config: &mut prost_build::Config, scope: &str, message: &DescriptorProto) {
    let path = format!("{}.{}", scope, message.name());

    for field in &message.field {
        let field_path = format!("{}.{}", path, field.name());
        let optional = field.proto3_optional() || field.r#type() == Type::Message;

        config.field_attribute(&field_path, "#[serde(default)]");
        if field.label() == Label::Repeated {
            continue;
        }

        if field.name() == "type" {
            config.field_attribute(&field_path, "#[serde(rename = \"type\")]");
        }

        match field.r#type() {
            Type::Enum => {
                let helper = enum_helper(field.type_name());
                config.field_attribute(
                    &field_path,
                    format!("#[serde(with = \"crate::wire::enum_serde::{}\")]", helper),
                );
            }
            Type::Bytes if optional => {
                config.field_attribute(
                    &field_path,
                    "#[serde(with = \"crate::wire::base64_bytes::option\")]",
                );
            }
            Type::Bytes => {
                config.field_attribute(
                    &field_path,
                    "#[serde(with = \"crate::wire::base64_bytes\")]",
                );
            }
            _ => {}
        }

        if optional {
            config.field_attribute(
                &field_path,
                "#[serde(skip_serializing_if = \"Option::is_none\")]",
            );
        }
    }

    for nested in &message.nested_type {
        annotate_message(config, &path, nested);
    }
}

/// `.agent.ProcessIO.Data.Type` becomes `agent_process_io_data_type`.
fn enum_helper(type_name: &str) -> String {
    type_name
        .trim_start_matches('.')
        .split('.')
        .map(snake_case)
        .collect::<Vec<_>>()
        .join("_")
}

fn snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::new();
    for (i, c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_ascii_lowercase());
            if prev.is_ascii_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_ascii_uppercase() && next_lower)
            {
                out.push('_');
            }
        }
        out.push(c.to_ascii_lowercase());
    }
    out
}
