use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use objbridge_remote::{HandleKind, MemberKind, RemoteHandle, Value};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct MemberOutput<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    level: usize,
    writable: bool,
    enumerable: bool,
}

#[derive(Serialize)]
struct InspectOutput<'a> {
    name: &'a str,
    id: u64,
    class: &'a str,
    kind: &'static str,
    members: Vec<MemberOutput<'a>>,
}

fn member_kind(kind: MemberKind) -> &'static str {
    match kind {
        MemberKind::Method => "method",
        MemberKind::Accessor => "accessor",
    }
}

fn handle_kind(kind: HandleKind) -> &'static str {
    match kind {
        HandleKind::Object => "object",
        HandleKind::Function => "function",
    }
}

/// Every member table of a handle, own level first. Shadowed entries stay
/// visible so the prototype chain reads as the peer described it.
fn member_rows(handle: &RemoteHandle) -> Vec<MemberOutput<'_>> {
    handle
        .levels()
        .iter()
        .enumerate()
        .flat_map(|(level, members)| {
            members.iter().map(move |member| MemberOutput {
                name: &member.name,
                kind: member_kind(member.kind),
                level,
                writable: member.writable,
                enumerable: member.enumerable,
            })
        })
        .collect()
}

pub fn print_members(name: &str, handle: &RemoteHandle, format: OutputFormat) {
    let members = member_rows(handle);
    match format {
        OutputFormat::Json => {
            let out = InspectOutput {
                name,
                id: handle.id(),
                class: handle.class_name(),
                kind: handle_kind(handle.kind()),
                members,
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["MEMBER", "TYPE", "LEVEL", "WRITABLE", "ENUMERABLE"]);
            for member in &members {
                table.add_row(vec![
                    member.name.to_string(),
                    member.kind.to_string(),
                    member.level.to_string(),
                    member.writable.to_string(),
                    member.enumerable.to_string(),
                ]);
            }
            println!("{name} ({} #{})", handle.class_name(), handle.id());
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("{name}: {} #{}", handle.class_name(), handle.id());
            for member in &members {
                let access = if member.writable { "rw" } else { "ro" };
                println!(
                    "  {}{} {} {access}",
                    "  ".repeat(member.level),
                    member.name,
                    member.kind
                );
            }
        }
    }
}

pub fn print_value(value: &Value, format: OutputFormat) {
    let json = value.to_json();
    match format {
        OutputFormat::Json => println!("{json}"),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["TYPE", "VALUE"])
                .add_row(vec![value.type_name().to_string(), json.to_string()]);
            println!("{table}");
        }
        OutputFormat::Pretty => match value {
            Value::String(s) => println!("{s}"),
            _ => println!(
                "{}",
                serde_json::to_string_pretty(&json).unwrap_or_else(|_| json.to_string())
            ),
        },
    }
}
