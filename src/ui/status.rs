use dialoguer::console::style;

pub enum CommandStatus {
    Success,
    Warning,
}

pub fn print_command_status(status: CommandStatus, message: &str) {
    let indicator = match status {
        CommandStatus::Success => style("✓").green(),
        CommandStatus::Warning => style("!").yellow(),
    };
    eprintln!("{indicator} {message}");
}
