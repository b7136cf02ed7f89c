//! Year/month counts for `--list-only`.

use std::collections::BTreeMap;
use std::io::{self, Write};

use chrono::Datelike;

use crate::backup::item::MediaItem;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct LibraryStats {
    by_month: BTreeMap<(i32, u32), usize>,
    unknown_date: usize,
}

impl LibraryStats {
    pub fn from_items(items: &[MediaItem]) -> Self {
        let mut stats = Self::default();
        for item in items {
            match &item.capture_time {
                Some(t) => *stats.by_month.entry((t.year(), t.month())).or_insert(0) += 1,
                None => stats.unknown_date += 1,
            }
        }
        stats
    }

    pub fn by_year(&self) -> BTreeMap<i32, usize> {
        let mut years = BTreeMap::new();
        for (&(year, _), &count) in &self.by_month {
            *years.entry(year).or_insert(0) += count;
        }
        years
    }

    pub fn month_count(&self, year: i32, month: u32) -> usize {
        self.by_month.get(&(year, month)).copied().unwrap_or(0)
    }

    pub fn unknown_date(&self) -> usize {
        self.unknown_date
    }

    pub fn total(&self) -> usize {
        self.by_month.values().sum::<usize>() + self.unknown_date
    }

    /// Newest year first, months ascending, with a subtotal per year.
    pub fn write_table(&self, out: &mut impl Write) -> io::Result<()> {
        writeln!(out, "{:<6} {:<6} {:>8}", "Year", "Month", "Items")?;
        for (year, year_total) in self.by_year().into_iter().rev() {
            let mut first = true;
            for (&(_, month), count) in self.by_month.range((year, 1)..=(year, 12)) {
                let label = if first { year.to_string() } else { String::new() };
                first = false;
                writeln!(out, "{:<6} {:<6} {:>8}", label, format!("{:02}", month), count)?;
            }
            writeln!(out, "{:<6} {:<6} {:>8}", "", "total", year_total)?;
            writeln!(out)?;
        }
        writeln!(out, "Total: {} photos/videos", self.total())?;
        writeln!(out, "(unknown date: {})", self.unknown_date)?;
        Ok(())
    }

    pub fn print(&self) -> io::Result<()> {
        self.write_table(&mut io::stdout().lock())
    }
}
