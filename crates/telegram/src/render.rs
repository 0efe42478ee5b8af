//! Plain-text renderings of reports and trade events.

use std::fmt::Write;

use common::TradeEvent;
use engine::{StatusReport, SummaryReport};

pub fn status(s: &StatusReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Mode: {}", s.mode);
    let _ = writeln!(
        out,
        "Entries: {}",
        if s.paused { "paused" } else { "active" }
    );
    let _ = writeln!(out, "Scheduler: {}", s.scheduler);

    if s.positions.is_empty() {
        let _ = writeln!(out, "Positions: none");
    } else {
        let _ = writeln!(out, "Positions:");
        for p in &s.positions {
            let _ = writeln!(
                out,
                "  {} {} entry {:.6} qty {:.6} ({})",
                p.market, p.status, p.entry_price, p.quantity, p.entry_reason
            );
        }
    }

    if !s.cooldowns.is_empty() {
        let _ = writeln!(out, "Cooldowns:");
        for c in &s.cooldowns {
            let _ = writeln!(out, "  {} until {}", c.market, c.expires_at.format("%H:%M:%S UTC"));
        }
    }

    let p = &s.parameters;
    let _ = write!(
        out,
        "Thresholds: band {:.2}, slope {:.3}%, range {:.2}%, volume x{:.2}, rsi <= {:.0}, min score {}",
        p.band_position_min,
        p.slope_min_pct,
        p.range_min_pct,
        p.volume_spike_ratio,
        p.rsi_ceiling,
        p.min_score
    );
    out
}

pub fn summary(s: &SummaryReport) -> String {
    let t = &s.trades;
    if t.count == 0 {
        return "No closed trades yet.".to_string();
    }

    let mut out = String::new();
    let _ = writeln!(
        out,
        "Trades: {} ({} win / {} loss, {:.0}% win rate)",
        t.count,
        t.wins,
        t.losses,
        t.win_rate * 100.0
    );
    let _ = writeln!(out, "Cumulative: {:+.2}%", t.cumulative_pct);
    if let (Some(best), Some(worst)) = (t.best_pct, t.worst_pct) {
        let _ = writeln!(out, "Best {best:+.2}%, worst {worst:+.2}%");
    }
    if !s.signals.is_empty() {
        let _ = writeln!(out, "Signals:");
        for (name, perf) in &s.signals {
            let _ = writeln!(
                out,
                "  {name}: {}W/{}L weight {:+.2}",
                perf.wins, perf.losses, perf.weight
            );
        }
    }
    out.trim_end().to_string()
}

pub fn event(e: &TradeEvent) -> String {
    match e {
        TradeEvent::Entered {
            market,
            price,
            reason,
        } => format!("🟢 Bought {market} at {price:.6} ({reason})"),
        TradeEvent::EntryFailed {
            market,
            error,
            ambiguous,
        } => {
            if *ambiguous {
                format!("🚨 Entry on {market} has an unknown outcome, check the venue: {error}")
            } else {
                format!("⛔ Entry on {market} failed: {error}")
            }
        }
        TradeEvent::UnmanagedFill {
            market,
            quantity,
            price,
            detail,
        } => format!(
            "🚨 Holding {quantity:.8} {market} bought at {price:.6} without a managed position: {detail}"
        ),
        TradeEvent::Exited { trade } => format!(
            "✅ Sold {} at {:.6} ({}): {:+.2}% {}",
            trade.market, trade.exit_price, trade.exit_reason, trade.change_pct, trade.outcome
        ),
        TradeEvent::ExitStuck {
            market,
            attempts,
            error,
        } => format!(
            "🛑 Exit on {market} is stuck after {attempts} attempt(s): {error}. Use /reset once handled."
        ),
        TradeEvent::StaleEntryCleared { market } => {
            format!("⚠️ Cleared an unfinished entry on {market} left by a previous run")
        }
        TradeEvent::PositionsReset { operator, cleared } => {
            if cleared.is_empty() {
                format!("{operator} ran a reset; nothing was open")
            } else {
                format!("{operator} reset positions: {}", cleared.join(", "))
            }
        }
    }
}
