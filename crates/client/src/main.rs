mod models;

use colored::*;
use futures::StreamExt;
use models::*;
use std::env;
use std::io::{self, Write};

const DEFAULT_BACKEND_URL: &str = "http://localhost:3000";
const PAGE_SIZE: i64 = 10;
const PREVIEW_CHARS: usize = 60;

// ===== Main =====

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let backend_url = env::var("BACKEND_URL").unwrap_or_else(|_| DEFAULT_BACKEND_URL.to_string());

    println!("{}", "=".repeat(60).bright_cyan());
    println!("{}", "    📋 SALES TEST REVIEW 📋".bright_yellow().bold());
    println!("{}", "=".repeat(60).bright_cyan());
    println!();

    let client = reqwest::Client::new();
    review_loop(&client, backend_url.trim_end_matches('/')).await
}

// ===== Commands =====

#[derive(Debug, PartialEq)]
enum Command {
    Next,
    Prev,
    Select(i64),
    Clear,
    Analyze,
    Quit,
}

fn parse_command(input: &str) -> Option<Command> {
    let input = input.trim().to_lowercase();
    let mut parts = input.split_whitespace();
    let command = match parts.next()? {
        "n" | "next" => Command::Next,
        "p" | "prev" => Command::Prev,
        "s" | "select" => Command::Select(parts.next()?.parse().ok()?),
        "c" | "clear" => Command::Clear,
        "a" | "analyze" => Command::Analyze,
        "q" | "quit" => Command::Quit,
        _ => return None,
    };
    Some(command)
}

// ===== Review Loop =====

async fn review_loop(client: &reqwest::Client, backend_url: &str) -> anyhow::Result<()> {
    let mut offset = 0;
    let mut selected: Vec<ResultItem> = Vec::new();

    loop {
        println!("Fetching results...");
        let page = fetch_page(client, backend_url, offset).await?;
        print_page(&page, &selected);

        print!("{}", "> ".bright_green().bold());
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            return Ok(());
        }

        match parse_command(&input) {
            Some(Command::Next) => {
                if page.offset + page.limit < page.total {
                    offset = page.offset + page.limit;
                } else {
                    println!("{}", "Already on the last page.".yellow());
                }
            }
            Some(Command::Prev) => {
                offset = (page.offset - page.limit).max(0);
            }
            Some(Command::Select(id)) => {
                if let Some(pos) = selected.iter().position(|item| item.id == id) {
                    selected.remove(pos);
                    println!("{}", format!("− Unselected #{id}").yellow());
                } else if let Some(item) = page.data.iter().find(|item| item.id == id) {
                    selected.push(item.clone());
                    println!("{}", format!("✓ Selected #{id}").green());
                } else {
                    println!("{}", format!("No result #{id} on this page.").red());
                }
            }
            Some(Command::Clear) => {
                selected.clear();
                println!("{}", "Selection cleared.".yellow());
            }
            Some(Command::Analyze) => {
                if selected.is_empty() {
                    println!("{}", "Select at least one result first.".red());
                    continue;
                }
                println!(
                    "{}",
                    "Prompt (leave empty for the default):".bright_white().bold()
                );
                print!("{}", "> ".bright_green().bold());
                io::stdout().flush()?;
                let mut prompt = String::new();
                io::stdin().read_line(&mut prompt)?;
                let prompt = Some(prompt.trim().to_string()).filter(|p| !p.is_empty());

                if let Err(e) = stream_analysis(client, backend_url, &selected, prompt).await {
                    eprintln!("{} {}", "❌ Analysis failed:".red().bold(), e);
                }
            }
            Some(Command::Quit) => {
                println!();
                println!("{}", "Bye! 👋".bright_cyan().bold());
                return Ok(());
            }
            None => {
                println!("{}", "Invalid choice. Please try again.".red());
            }
        }
    }
}

fn format_date(raw: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.format("%d.%m.%Y %H:%M").to_string())
        .unwrap_or_else(|_| raw.to_string())
}

fn preview(text: &str) -> String {
    let single_line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if single_line.chars().count() <= PREVIEW_CHARS {
        return single_line;
    }
    let cut: String = single_line.chars().take(PREVIEW_CHARS).collect();
    format!("{cut}…")
}

fn print_page(page: &DataPage, selected: &[ResultItem]) {
    println!("{}", "━".repeat(60).bright_black());
    let last = (page.offset + page.data.len() as i64).min(page.total);
    println!(
        "{} {}-{} of {}   {} {}",
        "Results:".bright_black(),
        (page.offset + 1).min(last).to_string().bright_cyan(),
        last.to_string().bright_cyan(),
        page.total.to_string().bright_cyan(),
        "Selected:".bright_black(),
        selected.len().to_string().bright_green()
    );
    println!();

    for item in &page.data {
        let marker = if selected.iter().any(|s| s.id == item.id) {
            "●".green()
        } else {
            "○".bright_black()
        };
        println!(
            "{} {} {} {}",
            marker,
            format!("#{}", item.id).bright_cyan(),
            format_date(&item.created_at).bright_black(),
            item.full_name.bright_white().bold()
        );
        println!("    {} {}", "Theme:".bright_black(), item.theme_name);
        println!("    {} {}", "Answer:".bright_black(), preview(&item.user_answer));
        println!("    {} {}", "Result:".bright_black(), preview(&item.result).yellow());
    }

    println!();
    println!(
        "{}",
        "[N]ext  [P]rev  [S]elect <id>  [C]lear  [A]nalyze  [Q]uit".bright_black()
    );
}

// ===== API Calls =====

async fn error_detail(response: reqwest::Response) -> String {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => format!("({}) {}", status, body.detail),
        Err(_) => format!("({}) {}", status, text),
    }
}

async fn fetch_page(
    client: &reqwest::Client,
    backend_url: &str,
    offset: i64,
) -> anyhow::Result<DataPage> {
    let response = client
        .get(format!("{}/api/data", backend_url))
        .query(&[("offset", offset), ("limit", PAGE_SIZE)])
        .send()
        .await?;

    if !response.status().is_success() {
        anyhow::bail!("API error {}", error_detail(response).await);
    }

    Ok(response.json().await?)
}

async fn stream_analysis(
    client: &reqwest::Client,
    backend_url: &str,
    selected: &[ResultItem],
    prompt: Option<String>,
) -> anyhow::Result<()> {
    let request = AnalysisRequest {
        selected_answers: selected,
        prompt,
    };

    let response = client
        .post(format!("{}/api/analyze", backend_url))
        .json(&request)
        .send()
        .await?;

    if !response.status().is_success() {
        anyhow::bail!("API error {}", error_detail(response).await);
    }

    println!();
    println!("{}", "    🧠 ANALYSIS".bright_yellow().bold());
    println!();

    let mut stdout = io::stdout();
    let mut body = response.bytes_stream();
    let mut pending: Vec<u8> = Vec::new();
    while let Some(chunk) = body.next().await {
        pending.extend_from_slice(&chunk?);
        // Hold back an incomplete UTF-8 sequence until the rest arrives.
        let valid = match std::str::from_utf8(&pending) {
            Ok(text) => text.len(),
            Err(e) => e.valid_up_to(),
        };
        stdout.write_all(&pending[..valid])?;
        stdout.flush()?;
        pending.drain(..valid);
    }
    stdout.write_all(&pending)?;

    println!();
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!(parse_command("n\n"), Some(Command::Next));
        assert_eq!(parse_command(" PREV "), Some(Command::Prev));
        assert_eq!(parse_command("s 52"), Some(Command::Select(52)));
        assert_eq!(parse_command("select 7"), Some(Command::Select(7)));
        assert_eq!(parse_command("a"), Some(Command::Analyze));
        assert_eq!(parse_command("q"), Some(Command::Quit));
        assert_eq!(parse_command("s"), None);
        assert_eq!(parse_command("s abc"), None);
        assert_eq!(parse_command(""), None);
        assert_eq!(parse_command("x"), None);
    }

    #[test]
    fn formats_dates_or_keeps_raw() {
        assert_eq!(format_date("2025-03-01T09:05:00Z"), "01.03.2025 09:05");
        assert_eq!(format_date("yesterday"), "yesterday");
    }

    #[test]
    fn previews_are_single_line_and_bounded() {
        assert_eq!(preview("short\nanswer"), "short answer");
        let long = "д".repeat(100);
        let cut = preview(&long);
        assert_eq!(cut.chars().count(), PREVIEW_CHARS + 1);
        assert!(cut.ends_with('…'));
    }
}
