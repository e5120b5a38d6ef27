#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
    pub usage: &'static str,
}

/// Commands whose whole remainder is one free-text argument.
pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "preset",
        action: "select_preset",
        usage: "/preset <instagram|ghibli|professional|other>",
    },
    CommandSpec {
        command: "custom",
        action: "apply_custom",
        usage: "/custom <style text>",
    },
    CommandSpec {
        command: "ratio",
        action: "set_aspect_ratio",
        usage: "/ratio <1:1|4:5|16:9>",
    },
    CommandSpec {
        command: "remove",
        action: "remove_attachment",
        usage: "/remove <n>",
    },
];

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "save",
    action: "save_images",
    usage: "/save [dir]",
}];

pub(crate) const MULTI_PATH_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "attach",
    action: "attach",
    usage: "/attach <path> [path ...]",
}];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "clear",
        action: "clear_attachments",
        usage: "/clear",
    },
    CommandSpec {
        command: "reset",
        action: "clear_results",
        usage: "/reset",
    },
    CommandSpec {
        command: "status",
        action: "status",
        usage: "/status",
    },
    CommandSpec {
        command: "presets",
        action: "list_presets",
        usage: "/presets",
    },
    CommandSpec {
        command: "history",
        action: "history",
        usage: "/history",
    },
    CommandSpec {
        command: "recent",
        action: "recent",
        usage: "/recent",
    },
    CommandSpec {
        command: "help",
        action: "help",
        usage: "/help",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
        usage: "/quit",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
        usage: "/exit",
    },
];

pub(crate) const COMMAND_GROUPS: &[&[CommandSpec]] = &[
    RAW_ARG_COMMANDS,
    SINGLE_PATH_COMMANDS,
    MULTI_PATH_COMMANDS,
    NO_ARG_COMMANDS,
];

/// One usage line per studio command, in help order.
pub fn help_lines() -> Vec<&'static str> {
    COMMAND_GROUPS
        .iter()
        .flat_map(|group| group.iter().map(|spec| spec.usage))
        .collect()
}
