use anyhow::Result;
use colored::Colorize;

use crate::catalog;
use crate::ui;
use crate::units::DECLARED;

/// `rigger features`
pub fn features() -> Result<()> {
    let registry = catalog::registry();
    ui::header("Optional Features");

    for category in registry.categories() {
        ui::section(category);
        for feature in registry.iter().filter(|f| f.category == category) {
            println!("  {:<18} {}", feature.id.bold(), feature.description.dimmed());
        }
    }

    println!();
    ui::dim("Exclude with `--exclude <id>` or `--exclude category:<name>`,");
    ui::dim("or list tokens one per line in the exclusion file.");
    Ok(())
}

/// `rigger units`
pub fn units() -> Result<()> {
    ui::header("Installation Units");

    for declared in &DECLARED {
        let unit = &declared.descriptor;
        let feature = declared
            .feature
            .map(|f| format!("feature: {f}"))
            .unwrap_or_default();
        println!(
            "  {} {:<18} {:<20} {}",
            format!("{:>2}.", unit.ordinal).blue(),
            unit.id.bold(),
            unit.name,
            feature.dimmed()
        );
    }
    Ok(())
}
