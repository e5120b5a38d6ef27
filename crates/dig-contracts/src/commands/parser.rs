use super::registry::{
    CommandSpec, MULTI_PATH_COMMANDS, NO_ARG_COMMANDS, RAW_ARG_COMMANDS, SINGLE_PATH_COMMANDS,
};

/// One line of studio input, resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StudioCommand {
    Noop,
    /// Plain text: compose and submit it.
    Generate { text: String },
    SelectPreset { preset: String },
    ApplyCustom { snippet: String },
    SetAspectRatio { ratio: String },
    Attach { paths: Vec<String> },
    /// Zero-based; `None` when the argument was not a positive number.
    RemoveAttachment { index: Option<usize> },
    ClearAttachments,
    ClearResults,
    SaveImages { dir: Option<String> },
    Status,
    ListPresets,
    History,
    Recent,
    Help,
    Quit,
    Unknown { command: String, arg: String },
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn parse_path_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg.split_whitespace().map(str::to_string).collect(),
    }
}

fn parse_single_path_arg(arg: &str) -> Option<String> {
    let parts = parse_path_args(arg);
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

/// `/remove` counts from 1 like the numbered attachment list.
fn parse_position(arg: &str) -> Option<usize> {
    arg.trim()
        .trim_start_matches('#')
        .parse::<usize>()
        .ok()
        .and_then(|position| position.checked_sub(1))
}

fn raw_command(action: &str, arg: &str) -> StudioCommand {
    match action {
        "select_preset" => StudioCommand::SelectPreset {
            preset: arg.to_ascii_lowercase(),
        },
        "apply_custom" => StudioCommand::ApplyCustom {
            snippet: arg.to_string(),
        },
        "set_aspect_ratio" => StudioCommand::SetAspectRatio {
            ratio: arg.to_string(),
        },
        _ => StudioCommand::RemoveAttachment {
            index: parse_position(arg),
        },
    }
}

fn no_arg_command(action: &str) -> StudioCommand {
    match action {
        "clear_attachments" => StudioCommand::ClearAttachments,
        "clear_results" => StudioCommand::ClearResults,
        "status" => StudioCommand::Status,
        "list_presets" => StudioCommand::ListPresets,
        "history" => StudioCommand::History,
        "recent" => StudioCommand::Recent,
        "quit" => StudioCommand::Quit,
        _ => StudioCommand::Help,
    }
}

pub fn parse_command(text: &str) -> StudioCommand {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return StudioCommand::Noop;
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if let Some(action) = find_action(&command, RAW_ARG_COMMANDS) {
                return raw_command(action, arg);
            }
            if find_action(&command, SINGLE_PATH_COMMANDS).is_some() {
                return StudioCommand::SaveImages {
                    dir: parse_single_path_arg(arg),
                };
            }
            if find_action(&command, MULTI_PATH_COMMANDS).is_some() {
                return StudioCommand::Attach {
                    paths: parse_path_args(arg),
                };
            }
            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return no_arg_command(action);
            }
            return StudioCommand::Unknown {
                command,
                arg: arg.to_string(),
            };
        }
    }

    StudioCommand::Generate {
        text: raw_trimmed.to_string(),
    }
}
