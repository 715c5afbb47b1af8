//! Terminal prompt driver: plain stderr prompts, stdin answers.

use async_trait::async_trait;
use serde_json::Value;

use rb_core::EngineError;
use rb_core::types::PromptMode;
use rb_engine::{PromptDriver, PromptRequest};

pub struct ConsolePromptDriver;

/// Read one line from stdin off the async runtime. EOF means the operator
/// closed the stream, which cancels the prompt.
async fn read_line() -> Result<String, EngineError> {
    let line = tokio::task::spawn_blocking(|| {
        let mut buffer = String::new();
        match std::io::stdin().read_line(&mut buffer) {
            Ok(0) => None,
            Ok(_) => Some(buffer.trim_end_matches(['\n', '\r']).to_string()),
            Err(_) => None,
        }
    })
    .await
    .map_err(|_| EngineError::PromptCancelled)?;
    line.ok_or(EngineError::PromptCancelled)
}

fn print_options(request: &PromptRequest) {
    for (index, option) in request.options.iter().enumerate() {
        let hint = option
            .hint
            .as_deref()
            .map(|h| format!("  ({h})"))
            .unwrap_or_default();
        let disabled = if option.disabled { "  [disabled]" } else { "" };
        eprintln!("  {}. {}{hint}{disabled}", index + 1, option.label);
    }
}

fn parse_index(input: &str, request: &PromptRequest) -> Option<usize> {
    let index = input.trim().parse::<usize>().ok()?.checked_sub(1)?;
    let option = request.options.get(index)?;
    (!option.disabled).then_some(index)
}

#[async_trait]
impl PromptDriver for ConsolePromptDriver {
    async fn prompt(&mut self, request: &PromptRequest) -> Result<Value, EngineError> {
        match request.mode {
            PromptMode::Input => {
                let default_hint = request
                    .default
                    .as_ref()
                    .and_then(Value::as_str)
                    .map(|d| format!(" [{d}]"))
                    .unwrap_or_default();
                eprint!("{}{default_hint}: ", request.text);
                let line = read_line().await?;
                if line.is_empty() {
                    if let Some(default) = &request.default {
                        return Ok(default.clone());
                    }
                }
                Ok(Value::String(line))
            }
            PromptMode::Confirm => {
                let default_yes = request.default.as_ref().and_then(Value::as_bool);
                let hint = match default_yes {
                    Some(true) => "[Y/n]",
                    Some(false) => "[y/N]",
                    None => "[y/n]",
                };
                loop {
                    eprint!("{} {hint} ", request.text);
                    let line = read_line().await?;
                    match line.trim().to_lowercase().as_str() {
                        "y" | "yes" => return Ok(Value::Bool(true)),
                        "n" | "no" => return Ok(Value::Bool(false)),
                        "" => {
                            if let Some(default) = default_yes {
                                return Ok(Value::Bool(default));
                            }
                        }
                        _ => eprintln!("Please answer y or n."),
                    }
                }
            }
            PromptMode::Select => loop {
                eprintln!("{}", request.text);
                print_options(request);
                eprint!("Choice: ");
                let line = read_line().await?;
                if let Some(index) = parse_index(&line, request) {
                    return Ok(request.options[index].value.clone());
                }
                eprintln!("Enter a number between 1 and {}.", request.options.len());
            },
            PromptMode::Multiselect => loop {
                eprintln!("{}", request.text);
                print_options(request);
                eprint!("Choices (comma-separated): ");
                let line = read_line().await?;
                let mut chosen = Vec::new();
                let mut valid = true;
                for part in line.split(',').filter(|p| !p.trim().is_empty()) {
                    match parse_index(part, request) {
                        Some(index) => chosen.push(index),
                        None => {
                            valid = false;
                            break;
                        }
                    }
                }
                if !valid {
                    eprintln!("Enter numbers between 1 and {}.", request.options.len());
                    continue;
                }
                if request.show_selection_order && !chosen.is_empty() {
                    let order: Vec<String> = chosen
                        .iter()
                        .map(|&i| request.options[i].label.clone())
                        .collect();
                    eprintln!("Selection order: {}", order.join(" → "));
                }
                return Ok(Value::Array(
                    chosen
                        .into_iter()
                        .map(|i| request.options[i].value.clone())
                        .collect(),
                ));
            },
        }
    }

    async fn choose_action(
        &mut self,
        title: &str,
        actions: &[(String, String)],
    ) -> Result<String, EngineError> {
        loop {
            eprintln!("{title}");
            for (index, (label, _)) in actions.iter().enumerate() {
                eprintln!("  {}. {label}", index + 1);
            }
            eprint!("Choice: ");
            let line = read_line().await?;
            if let Some(index) = line
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
            {
                if let Some((_, target)) = actions.get(index) {
                    return Ok(target.clone());
                }
            }
            eprintln!("Enter a number between 1 and {}.", actions.len());
        }
    }
}
