//! Terminal rendering for command results, either human tables or JSON.

use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{ContentArrangement, Table};
use console::style;
use parley_core::actions::CompletionOutcome;
use parley_protocol::{Chat, Message, Role, Template};
use serde::Serialize;

const PREVIEW_CHARS: usize = 60;

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_completion(outcome: &CompletionOutcome) {
    println!(
        "{} {}",
        style(format!("chat {}", outcome.chat.id)).cyan().bold(),
        style(&outcome.chat.title).dim()
    );
    print_message(&outcome.assistant);
}

pub fn print_chat(chat: &Chat, messages: &[Message]) {
    println!(
        "{} {}",
        style(format!("chat {}", chat.id)).cyan().bold(),
        style(&chat.title).bold()
    );
    println!("{}", style(chat.created_at.format("%Y-%m-%d %H:%M UTC")).dim());
    for message in messages {
        println!();
        print_message(message);
    }
}

fn print_message(message: &Message) {
    let label = match message.role {
        Role::User => style("user").green().bold(),
        Role::Assistant => style("assistant").magenta().bold(),
        Role::System => style("system").yellow().bold(),
    };
    match (&message.provider, &message.model) {
        (Some(provider), Some(model)) => {
            println!("{} {}", label, style(format!("({provider}/{model})")).dim())
        }
        _ => println!("{label}"),
    }
    println!("{}", message.content);
}

pub fn print_chat_list(chats: &[Chat]) {
    if chats.is_empty() {
        println!("{}", style("No chats yet").dim());
        return;
    }
    let mut table = table(&["ID", "Title", "Created"]);
    for chat in chats {
        table.add_row(vec![
            chat.id.to_string(),
            chat.title.clone(),
            chat.created_at.format("%Y-%m-%d %H:%M").to_string(),
        ]);
    }
    println!("{table}");
}

pub fn print_template_list(templates: &[Template]) {
    if templates.is_empty() {
        println!("{}", style("No templates yet").dim());
        return;
    }
    let mut table = table(&["Name", "Body", "Updated"]);
    for template in templates {
        table.add_row(vec![
            template.name.clone(),
            preview(&template.body),
            template.updated_at.format("%Y-%m-%d %H:%M").to_string(),
        ]);
    }
    println!("{table}");
}

pub fn print_template(template: &Template) {
    println!("{}", style(&template.name).cyan().bold());
    println!("{}", template.body);
}

/// One-line confirmation for a template change, e.g. `created greet`.
pub fn print_template_change(verb: &str, template: &Template) {
    println!("{} {}", style(verb).green(), style(&template.name).bold());
}

fn table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.to_vec());
    table
}

fn preview(body: &str) -> String {
    let flat = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= PREVIEW_CHARS {
        flat
    } else {
        let cut: String = flat.chars().take(PREVIEW_CHARS).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_flattens_and_truncates() {
        assert_eq!(preview("a\n  b\tc"), "a b c");
        let long = "x".repeat(100);
        let out = preview(&long);
        assert_eq!(out.chars().count(), PREVIEW_CHARS + 1);
        assert!(out.ends_with('…'));
    }
}
