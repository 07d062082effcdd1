// Interactive console session.
//
// Every submitted message is screened on its own task, so a slow classifier
// call for one user never holds up anyone else. Administrative commands run
// inline, one at a time.

use super::commands::{Command, HELP};
use super::Error;
use crate::core::guard::{GuardOutcome, MessageGuard};
use crate::core::ledger::{LedgerStore, ViolationLogEntry};
use crate::core::rules::RuleStore;
use crate::core::text::truncate_chars;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;

const HISTORY_LIMIT: usize = 10;
const REPORT_LIMIT: usize = 50;
const PREVIEW_CHARS: usize = 60;

pub struct ConsoleSession<R: RuleStore + 'static, L: LedgerStore + 'static> {
    guard: Arc<MessageGuard<R, L>>,
}

impl<R: RuleStore + 'static, L: LedgerStore + 'static> ConsoleSession<R, L> {
    pub fn new(guard: Arc<MessageGuard<R, L>>) -> Self {
        Self { guard }
    }

    /// Read commands from stdin until `/quit` or end of input.
    pub async fn run(&self) -> anyhow::Result<()> {
        println!("Moderation console ready. Type /help for commands.");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut in_flight = JoinSet::new();

        while let Some(line) = lines.next_line().await? {
            let command = match Command::parse(&line) {
                Ok(Some(command)) => command,
                Ok(None) => continue,
                Err(e) => {
                    println!("❌ {}", e);
                    continue;
                }
            };

            match command {
                Command::Quit => break,
                Command::Message { user_id, text } => {
                    self.spawn_screening(&mut in_flight, user_id, text)
                }
                other => match self.execute(other).await {
                    Ok(reply) => println!("{}", reply),
                    Err(e) => {
                        tracing::error!(error = %e, "Console command failed");
                        println!("❌ {}", e);
                    }
                },
            }
        }

        // Let messages that are still being screened finish
        while in_flight.join_next().await.is_some() {}
        tracing::info!("Console session ended");
        Ok(())
    }

    fn spawn_screening(&self, tasks: &mut JoinSet<()>, user_id: u64, text: String) {
        let guard = Arc::clone(&self.guard);
        tasks.spawn(async move {
            match guard.screen(user_id, &text).await {
                Ok(outcome) => println!("{}", describe_outcome(user_id, &outcome)),
                Err(e) => {
                    tracing::error!(user_id, error = %e, "Failed to screen message");
                    println!("❌ [{}] message could not be processed: {}", user_id, e);
                }
            }
        });
    }

    /// Run one command and return the reply text.
    pub async fn execute(&self, command: Command) -> Result<String, Error> {
        let guard = &self.guard;
        let reply = match command {
            Command::Message { user_id, text } => {
                let outcome = guard.screen(user_id, &text).await?;
                describe_outcome(user_id, &outcome)
            }
            Command::Ban {
                user_id,
                minutes,
                reason,
            } => {
                let duration = (minutes > 0).then(|| Duration::minutes(i64::from(minutes)));
                let status = guard.ledger().ban_user(user_id, &reason, duration).await?;
                match status.until {
                    Some(until) => format!(
                        "🚫 User {} banned until {}: {}",
                        user_id,
                        until.format("%Y-%m-%d %H:%M UTC"),
                        reason
                    ),
                    None => format!("🚫 User {} banned until unbanned: {}", user_id, reason),
                }
            }
            Command::Unban { user_id } => {
                guard.ledger().unban_user(user_id).await?;
                let count = guard.ledger().violation_count(user_id).await?;
                format!(
                    "✅ User {} unbanned ({} active violation(s) still count toward escalation)",
                    user_id, count
                )
            }
            Command::Violations { user_id } => self.describe_user(user_id).await?,
            Command::Clear { user_id } => {
                let removed = guard.ledger().clear_violations(user_id).await?;
                guard.rate().reset_violations(user_id);
                format!(
                    "✅ Cleared {} violation(s) and the rate counter of user {}",
                    removed, user_id
                )
            }
            Command::Report => {
                let since = Utc::now() - Duration::hours(24);
                let entries = guard
                    .ledger()
                    .recent_violations(since, REPORT_LIMIT)
                    .await?;
                if entries.is_empty() {
                    "No violations in the last 24 hours".to_string()
                } else {
                    let mut out = format!("📋 {} violation(s) in the last 24 hours", entries.len());
                    for entry in &entries {
                        out.push('\n');
                        out.push_str(&describe_entry(entry, true));
                    }
                    out
                }
            }
            Command::AddWord {
                category,
                word,
                severity,
            } => {
                let added = guard
                    .engine()
                    .rules()
                    .add_stop_word(&word, &category, severity)
                    .await?;
                if added {
                    format!("✅ Added '{}' to category '{}'", word, category)
                } else {
                    format!("'{}' is already in category '{}'", word, category)
                }
            }
            Command::AddCombo {
                word_a,
                word_b,
                category,
                severity,
            } => {
                let added = guard
                    .engine()
                    .rules()
                    .add_combination(&word_a, &word_b, &category, severity)
                    .await?;
                if added {
                    format!("✅ Added combination '{}' + '{}' ({})", word_a, word_b, category)
                } else {
                    format!("Combination '{}' + '{}' already exists", word_a, word_b)
                }
            }
            Command::Reload => {
                guard.engine().rules().reload().await?;
                "✅ Rules reloaded".to_string()
            }
            Command::Status => self.describe_status(),
            Command::ResetClassifiers => {
                guard.gateway().reset_failures();
                "✅ Classifier failure counters reset".to_string()
            }
            Command::Help => HELP.to_string(),
            Command::Quit => "Bye".to_string(),
        };
        Ok(reply)
    }

    async fn describe_user(&self, user_id: u64) -> Result<String, Error> {
        let ledger = self.guard.ledger();
        let state = ledger.active_state(user_id).await?;
        let history = ledger.violation_history(user_id, HISTORY_LIMIT).await?;
        let tier = self.guard.tier_for(user_id);
        let rate = self.guard.rate().user_stats(user_id);
        let limit = self.guard.rate().check_limit(user_id, tier);

        let mut out = format!(
            "User {}\nActive violations: {}",
            user_id, state.violations_count
        );
        if let Some(expire) = state.violations_expire_at {
            out.push_str(&format!(" (window ends {})", expire.format("%Y-%m-%d %H:%M UTC")));
        }
        if state.is_banned {
            let until = state
                .ban_until
                .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                .unwrap_or_else(|| "unbanned".to_string());
            out.push_str(&format!(
                "\nBanned until {}: {}",
                until,
                state.ban_reason.as_deref().unwrap_or("no reason")
            ));
        }
        out.push_str(&format!(
            "\nRate ({} tier): {} request(s) in window, {} rate violation(s)",
            tier, rate.requests_in_window, rate.violations
        ));
        if let Some(reset) = limit.seconds_to_reset {
            out.push_str(&format!(", limited for {:.0}s", reset));
        }

        if history.is_empty() {
            out.push_str("\nNo recorded violations");
        } else {
            out.push_str("\nRecent violations:");
            for entry in &history {
                out.push('\n');
                out.push_str(&describe_entry(entry, false));
            }
        }
        Ok(out)
    }

    fn describe_status(&self) -> String {
        let rules = self.guard.engine().rules().snapshot();
        let mut out = format!(
            "Rules: {} categories, {} combinations, {} spam patterns",
            rules.category_count(),
            rules.combination_count(),
            rules.spam_patterns().len()
        );

        let limits = self.guard.rate().limits();
        out.push_str(&format!(
            "\nRate limits: default {}, admin {}, new user {} per {}s",
            limits.default.max_requests,
            limits.admin.max_requests,
            limits.new_user.max_requests,
            limits.default.interval.as_secs()
        ));

        let gateway = self.guard.gateway();
        if !gateway.is_enabled() {
            out.push_str("\nClassifiers: none configured");
        }
        for health in gateway.health() {
            out.push_str(&format!(
                "\n{} classifier {}: {} consecutive failure(s){}",
                health.role,
                health.name,
                health.consecutive_failures,
                if health.skipped { " (skipped)" } else { "" }
            ));
        }
        out
    }
}

fn describe_entry(entry: &ViolationLogEntry, with_user: bool) -> String {
    let who = if with_user {
        format!("user {} ", entry.user_id)
    } else {
        String::new()
    };
    format!(
        "  {} {}[{}] {} | \"{}\"",
        entry.occurred_at.format("%Y-%m-%d %H:%M"),
        who,
        entry.kind,
        entry.reason,
        truncate_chars(&entry.message_text, PREVIEW_CHARS)
    )
}

/// Human-readable line for a screening outcome.
pub fn describe_outcome(user_id: u64, outcome: &GuardOutcome) -> String {
    match outcome {
        GuardOutcome::Allowed => format!("✅ [{}] message accepted", user_id),
        GuardOutcome::Bypassed => format!("✅ [{}] message accepted (privileged)", user_id),
        GuardOutcome::RateLimited {
            seconds_to_reset,
            violation_count,
        } => format!(
            "⏳ [{}] too many requests, try again in {:.0}s (rate violation #{})",
            user_id, seconds_to_reset, violation_count
        ),
        GuardOutcome::Banned { reason, until } => {
            let until = until
                .as_ref()
                .map(|t| format!(" until {}", t.format("%Y-%m-%d %H:%M UTC")))
                .unwrap_or_default();
            format!(
                "🚫 [{}] you are banned{}: {}",
                user_id,
                until,
                reason.as_deref().unwrap_or("no reason given")
            )
        }
        GuardOutcome::Warned { reason, count } => format!(
            "⚠️ [{}] warning #{}: {}. Further violations lead to a ban.",
            user_id, count, reason
        ),
        GuardOutcome::BanApplied {
            minutes,
            reason,
            count,
        } => format!(
            "🚫 [{}] violation #{}: {}. Banned for {} minute(s).",
            user_id, count, reason, minutes
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classifier::ClassifierGateway;
    use crate::core::guard::StaticUserDirectory;
    use crate::core::ledger::ViolationLedger;
    use crate::core::moderation::{LocalFilter, ModerationEngine};
    use crate::core::rate::RateGuard;
    use crate::core::rules::RuleSet;
    use crate::infra::ledger::InMemoryLedgerStore;
    use crate::infra::rules::JsonRuleStore;
    use tempfile::TempDir;

    async fn session(dir: &TempDir) -> ConsoleSession<JsonRuleStore, InMemoryLedgerStore> {
        let rules = RuleSet::load(JsonRuleStore::new(dir.path().join("rules.json"))).await;
        let guard = MessageGuard::new(
            RateGuard::default(),
            ModerationEngine::new(Arc::new(rules), LocalFilter::default()),
            ClassifierGateway::disabled(),
            ViolationLedger::new(InMemoryLedgerStore::new()),
            Box::new(StaticUserDirectory::default()),
        );
        ConsoleSession::new(Arc::new(guard))
    }

    async fn run(
        session: &ConsoleSession<JsonRuleStore, InMemoryLedgerStore>,
        line: &str,
    ) -> String {
        let command = Command::parse(line).unwrap().unwrap();
        session.execute(command).await.unwrap()
    }

    #[tokio::test]
    async fn test_added_word_takes_effect() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(&dir).await;

        assert!(run(&session, "10 play roulette tonight").await.contains("accepted"));
        assert!(run(&session, "/addword gambling roulette high").await.starts_with("✅"));

        let reply = run(&session, "10 play roulette tonight").await;
        assert!(reply.contains("warning #1"));
        assert!(reply.contains("category: gambling"));
    }

    #[tokio::test]
    async fn test_violations_report_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(&dir).await;
        run(&session, "/addword gambling roulette").await;
        run(&session, "11 roulette").await;

        let details = run(&session, "/violations 11").await;
        assert!(details.contains("Active violations: 1"));
        assert!(details.contains("Rate (default tier): 1 request(s)"));
        assert!(details.contains("roulette"));

        assert!(run(&session, "/report").await.contains("user 11"));

        assert!(run(&session, "/clear 11").await.contains("Cleared 1 violation"));
        assert!(run(&session, "/violations 11").await.contains("No recorded violations"));
    }

    #[tokio::test]
    async fn test_manual_ban_and_unban() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(&dir).await;

        assert!(run(&session, "/ban 12 0 abuse").await.contains("until unbanned"));
        assert!(run(&session, "12 hello").await.contains("banned"));

        assert!(run(&session, "/unban 12").await.contains("0 active violation"));
        assert!(run(&session, "12 hello").await.contains("accepted"));
    }

    #[tokio::test]
    async fn test_status_without_classifiers() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(&dir).await;

        let status = run(&session, "/status").await;
        assert!(status.contains("Rules: 0 categories"));
        assert!(status.contains("default 20, admin 100, new user 10 per 60s"));
        assert!(status.contains("none configured"));
    }
}
