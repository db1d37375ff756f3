//! Terminal output for provisioning runs
//!
//! Colored status lines plus a summary table of what happened to each
//! gateway.

use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use tabled::{settings::Style, Table, Tabled};

use mp_engine::driver::{GatewayFailure, RunReport};

/// Format the run's per-gateway outcomes as an ASCII table.
pub fn format_report(report: &RunReport) -> String {
    if report.gateways.is_empty() {
        return "No gateways processed".to_string();
    }

    #[derive(Tabled)]
    struct GatewayRow {
        #[tabled(rename = "MAC")]
        mac: String,
        #[tabled(rename = "IP")]
        ip: String,
        #[tabled(rename = "HOSTNAME")]
        hostname: String,
        #[tabled(rename = "PRODUCT")]
        product: String,
        #[tabled(rename = "LORA EUI-64")]
        eui: String,
        #[tabled(rename = "UID")]
        uid: String,
        #[tabled(rename = "STATUS")]
        status: String,
    }

    let rows: Vec<GatewayRow> = report
        .gateways
        .iter()
        .map(|g| GatewayRow {
            mac: g.mac.to_string(),
            ip: g.ip.to_string(),
            hostname: g.hostname.clone().unwrap_or_else(|| "-".to_string()),
            product: g.product_id.clone().unwrap_or_else(|| "-".to_string()),
            eui: g.lora_eui64.clone().unwrap_or_else(|| "-".to_string()),
            uid: g
                .jumphost_uid
                .map(|u| u.to_string())
                .unwrap_or_else(|| "-".to_string()),
            status: if g.provisioned {
                "provisioned".to_string()
            } else {
                "failed".to_string()
            },
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// One line per recorded failure.
pub fn format_failures(failures: &[GatewayFailure]) -> Vec<String> {
    failures
        .iter()
        .map(|f| format!("{} ({}): {} phase: {}", f.mac, f.ip, f.phase, f.detail))
        .collect()
}

/// One colored status line: glyph in the given color, then the message.
fn print_status<W: std::io::Write>(mut out: W, color: Color, glyph: &str, msg: &str) {
    let _ = crossterm::execute!(
        out,
        SetForegroundColor(color),
        Print(glyph),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Green checkmark on stdout.
pub fn print_success(msg: &str) {
    print_status(std::io::stdout(), Color::Green, "✓ ", msg);
}

/// Red cross on stderr.
pub fn print_error(msg: &str) {
    print_status(std::io::stderr(), Color::Red, "✗ ", msg);
}

/// Yellow warning on stderr.
pub fn print_warning(msg: &str) {
    print_status(std::io::stderr(), Color::Yellow, "⚠ ", msg);
}

/// Cyan info line on stdout.
pub fn print_info(msg: &str) {
    print_status(std::io::stdout(), Color::Cyan, "ℹ ", msg);
}
