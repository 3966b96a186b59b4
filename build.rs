use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

const DATE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");
const TIME_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[hour]:[minute]:[second]");

/// Export `var` to the crate: the environment override if set, else `now` formatted.
fn stamp(var: &str, now: OffsetDateTime, format: &[BorrowedFormatItem<'_>]) {
    let value = std::env::var(var)
        .ok()
        .or_else(|| now.format(format).ok())
        .unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env={var}={value}");
    println!("cargo:rerun-if-env-changed={var}");
}

fn main() {
    let now = OffsetDateTime::now_utc();
    stamp("DSCRIPT_BUILD_DATE", now, DATE_FORMAT);
    stamp("DSCRIPT_BUILD_TIME", now, TIME_FORMAT);
}
