use serde_json::Value;
use std::process::ExitCode;
use svcpkg::daemon::Outcome;

/// Print an outcome's message and any warning. Errors exit non-zero.
pub(crate) fn report(outcome: &Outcome) -> ExitCode {
    match outcome {
        Outcome::Success { message, .. } | Outcome::Info { message, .. } => println!("{message}"),
        Outcome::Error { message, .. } => eprintln!("Error: {message}"),
    }
    if let Some(warning) = outcome.get("warning").and_then(Value::as_str) {
        eprintln!("Warning: {warning}");
    }
    exit_code(outcome)
}

pub(crate) fn exit_code(outcome: &Outcome) -> ExitCode {
    if outcome.is_error() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Entries of an array payload field.
pub(crate) fn entries<'a>(outcome: &'a Outcome, key: &str) -> &'a [Value] {
    outcome
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

pub(crate) fn field<'a>(entry: &'a Value, key: &str) -> &'a str {
    entry.get(key).and_then(Value::as_str).unwrap_or("?")
}
