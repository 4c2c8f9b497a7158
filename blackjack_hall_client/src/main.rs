use futures_util::{SinkExt, StreamExt};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;
use uuid::Uuid;

use blackjack_hall_core::{format_cards, Action, ClientMessage, ServerMessage, TableSnapshot};

const DEFAULT_URL: &str = "ws://127.0.0.1:25917/ws";

#[derive(Debug, PartialEq)]
enum Command {
    Send(ClientMessage),
    Help,
    Exit,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let url = Url::parse(&std::env::var("BLACKJACK_URL").unwrap_or_else(|_| DEFAULT_URL.to_string()))?;

    println!("Connecting to {}", url);
    let (ws_stream, _) = connect_async(url.as_str()).await?;
    println!("Connected.");

    let (mut write, mut read) = ws_stream.split();

    tokio::spawn(async move {
        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(server_msg) => {
                        println!("\n{}", render(&server_msg));
                        print!("> ");
                        let _ = std::io::stdout().flush();
                    }
                    Err(e) => eprintln!("Could not parse server message: {}", e),
                },
                Ok(_) => {}
                Err(e) => {
                    eprintln!("Connection error: {}", e);
                    break;
                }
            }
        }
    });

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    print_help();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = stdin.next_line().await? else {
            break;
        };
        match parse_command(&line) {
            Ok(Command::Send(msg)) => {
                let payload = serde_json::to_string(&msg)?;
                write.send(Message::Text(payload.into())).await?;
            }
            Ok(Command::Help) => print_help(),
            Ok(Command::Exit) => {
                println!("Disconnecting...");
                break;
            }
            Err(usage) => println!("{}", usage),
        }
    }

    Ok(())
}

fn print_help() {
    println!("--- Blackjack hall ---");
    println!("  hello <name> [id secret] - introduce yourself (resume an id with its secret)");
    println!("  join <venue id|new>   - sit at a venue's table");
    println!("  leave                 - leave the table");
    println!("  bet <amount>          - stage a stake");
    println!("  clear | confirm       - clear or lock your stake");
    println!("  hit | stand | double | split");
    println!("  buyin                 - top up a low balance");
    println!("  add <id> <amount>     - admin top-up");
    println!("  ledger [n]            - show your last n ledger entries");
    println!("  older | newer         - page through round history");
    println!("  help | exit");
}

fn parse_command(line: &str) -> Result<Command, String> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let command = match parts.first() {
        Some(c) => c.to_ascii_lowercase(),
        None => return Err(String::new()),
    };
    let arg = |i: usize, usage: &str| parts.get(i).copied().ok_or_else(|| format!("Usage: {}", usage));

    let msg = match command.as_str() {
        "hello" => {
            let usage = "hello <name> [id secret]";
            let name = arg(1, usage)?.to_string();
            let (id, secret) = match (parts.get(2), parts.get(3)) {
                (None, _) => (None, None),
                (Some(id), Some(secret)) => (
                    Some(id.parse::<Uuid>().map_err(|_| format!("Not an id: {}", id))?),
                    Some(secret.parse::<Uuid>().map_err(|_| format!("Not a secret: {}", secret))?),
                ),
                (Some(_), None) => return Err(format!("Usage: {}", usage)),
            };
            ClientMessage::Hello { name, id, secret }
        }
        "join" => {
            let raw = arg(1, "join <venue id|new>")?;
            let venue = if raw == "new" {
                Uuid::new_v4()
            } else {
                raw.parse().map_err(|_| format!("Not a venue id: {}", raw))?
            };
            ClientMessage::JoinTable { venue }
        }
        "leave" => ClientMessage::LeaveTable,
        "bet" => {
            let raw = arg(1, "bet <amount>")?;
            ClientMessage::PlaceBet(raw.parse().map_err(|_| format!("Not an amount: {}", raw))?)
        }
        "clear" => ClientMessage::ClearBet,
        "confirm" => ClientMessage::ConfirmBet,
        "hit" => Action::Hit.into(),
        "stand" => Action::Stand.into(),
        "double" => Action::Double.into(),
        "split" => Action::Split.into(),
        "buyin" => ClientMessage::BuyIn,
        "add" => {
            let usage = "add <id> <amount>";
            let target = arg(1, usage)?.parse().map_err(|_| format!("Usage: {}", usage))?;
            let amount = arg(2, usage)?.parse().map_err(|_| format!("Usage: {}", usage))?;
            ClientMessage::AddBalance { target, amount }
        }
        "ledger" => {
            let limit = match parts.get(1) {
                Some(raw) => raw.parse().map_err(|_| "Usage: ledger [n]".to_string())?,
                None => 15,
            };
            ClientMessage::ShowLedger { limit }
        }
        "older" => ClientMessage::HistoryOlder,
        "newer" => ClientMessage::HistoryNewer,
        "help" => return Ok(Command::Help),
        "exit" | "quit" => return Ok(Command::Exit),
        other => return Err(format!("Unknown command: {}", other)),
    };
    Ok(Command::Send(msg))
}

fn render(msg: &ServerMessage) -> String {
    match msg {
        ServerMessage::Welcome { your_id, your_secret, is_admin, record } => format!(
            "Welcome! Your id is {}{}. Balance ${} ({}W/{}L)\nTo come back later: hello <name> {} {}",
            your_id,
            if *is_admin { " (admin)" } else { "" },
            record.balance,
            record.wins,
            record.losses,
            your_id,
            your_secret
        ),
        ServerMessage::TableUpdated(snapshot) => render_table(snapshot),
        ServerMessage::RoundResults(results) => {
            let mut out = format!("=== Results: dealer {} ({}) ===", format_cards(&results.dealer), results.dealer_total);
            for (label, lines) in [("Won", &results.winners), ("Push", &results.pushes), ("Lost", &results.losers)] {
                for line in lines {
                    out.push_str(&format!(
                        "\n{:>5}  {} {} ({}) bet ${}, round net {:+}",
                        label,
                        line.participant.name,
                        format_cards(&line.cards),
                        line.total,
                        line.bet,
                        line.round_net
                    ));
                }
            }
            out
        }
        ServerMessage::Notice { message } => format!("* {}", message),
        ServerMessage::Ledger { record, entries } => {
            let mut out = format!("Balance ${} ({}W/{}L)", record.balance, record.wins, record.losses);
            for entry in entries {
                out.push_str(&format!("\n  {:?} {:+} -> ${}", entry.kind, entry.delta, entry.balance_after));
            }
            out
        }
        ServerMessage::TableClosed { venue } => format!("Table {} closed for inactivity.", venue),
        ServerMessage::Error { message } => format!("! {}", message),
    }
}

fn render_table(s: &TableSnapshot) -> String {
    let dealer_total = s.dealer.total.map_or("?".to_string(), |t| t.to_string());
    let mut out = format!(
        "[{}] {:?} | dealer {}{} ({})",
        s.venue,
        s.phase,
        format_cards(&s.dealer.cards),
        " ??".repeat(s.dealer.hidden_cards),
        dealer_total
    );
    for seat in &s.seats {
        let mut line = format!("\n  {} ${}", seat.participant.name, seat.record.balance);
        if let Some(bet) = seat.pending_bet {
            line.push_str(&format!(" bet ${}{}", bet.amount, if bet.locked { " (locked)" } else { "" }));
        }
        for (i, hand) in seat.hands.iter().enumerate() {
            let marker = match s.current_turn {
                Some(turn) if turn.participant == seat.participant.id && turn.hand_index == i => "> ",
                _ => "",
            };
            line.push_str(&format!(" | {}{} ({}) ${}", marker, format_cards(&hand.cards), hand.value(), hand.bet));
        }
        out.push_str(&line);
    }
    if !s.waiting.is_empty() {
        let names: Vec<&str> = s.waiting.iter().map(|p| p.name.as_str()).collect();
        out.push_str(&format!("\n  waiting: {}", names.join(", ")));
    }
    if !s.valid_actions.is_empty() {
        out.push_str(&format!("\n  actions: {:?}", s.valid_actions));
    }
    if let Some(page) = &s.history {
        out.push_str(&format!("\n  history {}/{}: dealer {}", page.index + 1, page.total, page.round.dealer_total));
        for line in &page.round.lines {
            out.push_str(&format!("\n    {}", line));
        }
        if page.hidden_lines > 0 {
            out.push_str(&format!("\n    ... {} more", page.hidden_lines));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use blackjack_hall_core::BalanceRecord;

    #[test]
    fn test_parse_actions_and_bets() {
        assert_eq!(parse_command("hit"), Ok(Command::Send(ClientMessage::Act(Action::Hit))));
        assert_eq!(parse_command("  DOUBLE "), Ok(Command::Send(ClientMessage::Act(Action::Double))));
        assert_eq!(parse_command("bet 25"), Ok(Command::Send(ClientMessage::PlaceBet(25))));
        assert!(parse_command("bet lots").is_err());
        assert!(parse_command("bet").is_err());
        assert_eq!(parse_command("exit"), Ok(Command::Exit));
    }

    #[test]
    fn test_parse_hello_and_join() {
        let id = Uuid::new_v4();
        let secret = Uuid::new_v4();
        assert_eq!(
            parse_command(&format!("hello Ann {} {}", id, secret)),
            Ok(Command::Send(ClientMessage::Hello { name: "Ann".into(), id: Some(id), secret: Some(secret) }))
        );
        assert_eq!(
            parse_command("hello Ann"),
            Ok(Command::Send(ClientMessage::Hello { name: "Ann".into(), id: None, secret: None }))
        );
        assert!(parse_command(&format!("hello Ann {}", id)).is_err());
        assert!(parse_command(&format!("hello Ann {} hunter2", id)).is_err());
        assert_eq!(
            parse_command(&format!("join {}", id)),
            Ok(Command::Send(ClientMessage::JoinTable { venue: id }))
        );
        assert!(matches!(parse_command("join new"), Ok(Command::Send(ClientMessage::JoinTable { .. }))));
        assert!(parse_command("join nowhere").is_err());
    }

    #[test]
    fn test_welcome_shows_how_to_resume() {
        let id = Uuid::new_v4();
        let secret = Uuid::new_v4();
        let text = render(&ServerMessage::Welcome {
            your_id: id,
            your_secret: secret,
            is_admin: true,
            record: BalanceRecord { balance: 100, wins: 2, losses: 1 },
        });
        assert!(text.contains("(admin)"));
        assert!(text.contains(&format!("hello <name> {} {}", id, secret)));
    }

    #[test]
    fn test_parse_ledger_defaults_to_fifteen() {
        assert_eq!(parse_command("ledger"), Ok(Command::Send(ClientMessage::ShowLedger { limit: 15 })));
        assert_eq!(parse_command("ledger 3"), Ok(Command::Send(ClientMessage::ShowLedger { limit: 3 })));
        assert!(parse_command("dance").is_err());
    }
}
