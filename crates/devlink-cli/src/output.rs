//! Human-readable rendering of responses and events.

use devlink::{Event, Response};
use serde_json::{Map, Value};

fn pretty(map: &Map<String, Value>) -> String {
    serde_json::to_string_pretty(map).unwrap_or_else(|_| format!("{:?}", map))
}

pub fn print_response(response: &Response) {
    println!("\nResponse:");
    let status = match response.status.as_str() {
        "" => "(missing)",
        s => s,
    };
    println!("  Status: {}", status);
    println!(
        "  Command ID: {}",
        response.command_id.as_deref().unwrap_or("N/A")
    );

    match &response.error {
        Some(error) => {
            println!("  Error Code: {}", error.code);
            println!("  Error Message: {}", error.message);
        }
        None => println!("  Result: {}", indent(&pretty(&response.result), 2)),
    }
}

pub fn print_event(event: &Event) {
    let sent = event
        .timestamp_ms
        .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis);
    let at = match sent {
        Some(ts) => ts.with_timezone(&chrono::Local),
        None => chrono::Local::now(),
    };
    println!("\n[{}] Event: {}", at.format("%H:%M:%S"), event.event_type);
    println!("  Device: {}", event.device_type);
    if let Some(state) = event.state() {
        println!("  State: {}", state);
    }
    println!("  Data: {}", indent(&pretty(&event.data), 2));
}

/// Indent every line after the first.
fn indent(text: &str, width: usize) -> String {
    let pad = " ".repeat(width);
    text.lines()
        .enumerate()
        .map(|(i, line)| {
            if i == 0 {
                line.to_string()
            } else {
                format!("{}{}", pad, line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indent_keeps_first_line() {
        assert_eq!(indent("{\n\"a\": 1\n}", 2), "{\n  \"a\": 1\n  }");
        assert_eq!(indent("{}", 4), "{}");
    }
}
