use super::ui;
use crate::core::conversion::Conversion;
use crate::core::rate::RateEntry;
use comfy_table::Cell;

/// Renders stored rates as a table, one row per currency.
pub fn rates_table(entries: &[RateEntry], base_currency: &str) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Currency"),
        ui::header_cell(&format!("Rate ({base_currency})")),
        ui::header_cell(&format!("Per 1 {base_currency}")),
    ]);

    for entry in entries {
        table.add_row(vec![
            Cell::new(&entry.code),
            ui::number_cell(entry.value, 4),
            ui::number_cell(1.0 / entry.value, 4),
        ]);
    }

    format!(
        "{}\n\n{}",
        ui::style_text("Exchange rates", ui::StyleType::Title),
        table
    )
}

pub fn display_rates(entries: Option<&[RateEntry]>, base_currency: &str) {
    match entries {
        Some(entries) => println!("{}", rates_table(entries, base_currency)),
        None => println!(
            "{}",
            ui::style_text(
                "No rates stored yet. Run `rates-bot refresh` first.",
                ui::StyleType::Subtle
            )
        ),
    }
}

pub fn display_conversion(conversion: &Conversion) {
    println!(
        "{}",
        ui::style_text(&conversion.to_string(), ui::StyleType::Result)
    );
}
