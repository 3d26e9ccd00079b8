use crate::state::AppState;
use healthgate::BreakerState;
use std::{
    sync::{atomic::Ordering, Arc},
    time::{Duration, Instant},
};
use tokio::time::sleep;

/// Run the live terminal dashboard.
/// - Default: ASCII status labels to avoid column drift.
/// - Set HG_TUI_EMOJI=1 to use emoji status (may misalign on some terminals).
/// - Tick interval: HG_TUI_INTERVAL_MS (default 2000 ms).
pub async fn run_terminal_dashboard(app: Arc<AppState>) {
    let mut last_total_calls: (u64, Instant) = (0, Instant::now());

    let interval = std::env::var("HG_TUI_INTERVAL_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(2000);

    let use_emoji = std::env::var("HG_TUI_EMOJI").ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false);

    loop {
        let start = Instant::now();

        let breaker = app.breaker().await;
        let state = breaker.current_state();
        let opts = breaker.options();
        let health = match breaker.health().await {
            Ok(hs) => hs,
            // replaced mid-tick; draw again next round
            Err(_) => {
                sleep(Duration::from_millis(interval)).await;
                continue;
            }
        };

        let status = match (state, use_emoji) {
            (BreakerState::Closed, true) => "🟢 CLOSED",
            (BreakerState::Closed, false) => "CLOSED",
            (BreakerState::Open, true) => "⛔ OPEN",
            (BreakerState::Open, false) => "OPEN",
        };

        let total_calls = app.total_calls.load(Ordering::Relaxed);
        let now = Instant::now();
        let (tps, tpm) = {
            let dt = now.duration_since(last_total_calls.1).as_secs_f64().max(0.001);
            let dc = total_calls.saturating_sub(last_total_calls.0) as f64;
            last_total_calls = (total_calls, now);
            (dc / dt, dc * (60.0 / dt))
        };

        let last_transition = match *app.last_transition.lock() {
            Some((s, at)) => format!("{} {}s ago", s, at.elapsed().as_secs()),
            None => "-".to_string(),
        };

        let row = Row {
            status: status.to_string(),
            window: format!("{}s", opts.window_seconds),
            successes: health.successes,
            failures: health.failures,
            total: health.total,
            error_pct: health.error_percentage,
            threshold: format!("{:.1}% / {}", opts.error_percentage_threshold, opts.minimum_request_volume),
            last_err: app.last_error().as_str().to_string(),
        };

        let summary = Summary {
            total_calls,
            rejected: app.rejected_calls.load(Ordering::Relaxed),
            upstream_errors: app.upstream_errors.load(Ordering::Relaxed),
            transitions: app.transitions.load(Ordering::Relaxed),
            last_transition,
            tps,
            tpm,
        };

        print_frame(&row, &summary);

        // Pace the loop
        let elapsed = start.elapsed();
        if elapsed < Duration::from_millis(interval) {
            sleep(Duration::from_millis(interval) - elapsed).await;
        }
    }
}

struct Row {
    status: String,
    window: String,
    successes: u64,
    failures: u64,
    total: u64,
    error_pct: f64,
    threshold: String,
    last_err: String,
}

struct Summary {
    total_calls: u64,
    rejected: u64,
    upstream_errors: u64,
    transitions: u64,
    last_transition: String,
    tps: f64,
    tpm: f64,
}

// --- formatting helpers ---

fn pad(s: &str, width: usize) -> String {
    let len = s.chars().count();
    if len >= width { s.to_string() } else { format!("{}{}", s, " ".repeat(width - len)) }
}

fn make_summary_line(total_width: usize, content: &str) -> String {
    let inner = total_width.saturating_sub(2);
    let clipped: String = content.chars().take(inner).collect();
    format!("│{}│", pad(&clipped, inner))
}

fn print_frame(r: &Row, s: &Summary) {
    // Column widths
    let w_stat = 10usize;
    let w_win = 8usize;
    let w_ok = 10usize;
    let w_fail = 10usize;
    let w_tot = 10usize;
    let w_pct = 9usize;
    let w_thr = 16usize; // "50.0% / 20"
    let w_lerr = 12usize; // last error reason (rpc_error/timeout/...)

    let total_w = 1 + w_stat + 1 + w_win + 1 + w_ok + 1 + w_fail + 1 + w_tot + 1 + w_pct + 1 + w_thr + 1 + w_lerr + 1;

    println!("╭{}╮", "─".repeat(total_w.saturating_sub(2)));
    let line1 = format!("  Calls: {} | Rejected: {} | Upstream errors: {}",
                        s.total_calls, s.rejected, s.upstream_errors);
    println!("{}", make_summary_line(total_w, &line1));
    let line2 = format!("  Ingress: {:.1} TPS | {:.0} TPM   Transitions: {} (last: {})",
                        s.tps, s.tpm, s.transitions, s.last_transition);
    println!("{}", make_summary_line(total_w, &line2));
    println!("╰{}╯", "─".repeat(total_w.saturating_sub(2)));

    println!(
        "┏{}┳{}┳{}┳{}┳{}┳{}┳{}┳{}┓",
        pad(" State", w_stat),
        pad(" Window", w_win),
        pad(" OK", w_ok),
        pad(" Failed", w_fail),
        pad(" Total", w_tot),
        pad(" Err %", w_pct),
        pad(" Trip at", w_thr),
        pad(" Last_err", w_lerr),
    );
    println!(
        "┡{}┿{}┿{}┿{}┿{}┿{}┿{}┿{}┩",
        "━".repeat(w_stat),
        "━".repeat(w_win),
        "━".repeat(w_ok),
        "━".repeat(w_fail),
        "━".repeat(w_tot),
        "━".repeat(w_pct),
        "━".repeat(w_thr),
        "━".repeat(w_lerr),
    );
    println!(
        "│{}│{}│{}│{}│{}│{}│{}│{}│",
        pad(&r.status, w_stat),
        pad(&r.window, w_win),
        pad(&format!("{}", r.successes), w_ok),
        pad(&format!("{}", r.failures), w_fail),
        pad(&format!("{}", r.total), w_tot),
        pad(&format!("{:.1}", r.error_pct), w_pct),
        pad(&r.threshold, w_thr),
        pad(&r.last_err, w_lerr),
    );
    println!("└{}┘", "─".repeat(total_w.saturating_sub(2)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_and_clip() {
        assert_eq!(pad("ab", 4), "ab  ");
        assert_eq!(pad("abcdef", 4), "abcdef");
        assert_eq!(make_summary_line(6, "abcdef"), "│abcd│");
    }
}
