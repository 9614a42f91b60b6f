//! Presentation helpers: percentages, gradient colours, diff highlighting
//! and a plain text table renderer.

use crate::error::Result;
use crate::result::QueryResult;

/// Formats a ratio as a percentage with two decimals (`0.1234` is `12.34%`).
#[must_use]
pub fn format_percentage(ratio: f64) -> String {
    format!("{:.2}%", ratio * 100.0)
}

/// Formats an optional ratio, rendering a missing one as `-`.
#[must_use]
pub fn format_optional_percentage(ratio: Option<f64>) -> String {
    ratio.map_or_else(|| "-".to_string(), format_percentage)
}

/// An RGB colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    /// White, the low end of every gradient.
    pub const WHITE: Self = Self(255, 255, 255);
    /// High end of the disagreement gradient.
    pub const RED: Self = Self(255, 0, 0);
    /// High end of the population gradient.
    pub const BLUE: Self = Self(0, 0, 255);
    /// Background of cells whose two sides differ.
    pub const HIGHLIGHT: Self = Self(0xfc, 0x9f, 0xba);

    /// Returns the colour as `#rrggbb`.
    #[must_use]
    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }

    /// Linear interpolation towards `other`; `t` is clamped to `[0, 1]`.
    #[must_use]
    pub fn mix(self, other: Self, t: f64) -> Self {
        let t = t.clamp(0.0, 1.0);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let channel =
            |a: u8, b: u8| (f64::from(a) + (f64::from(b) - f64::from(a)) * t).round() as u8;
        Self(
            channel(self.0, other.0),
            channel(self.1, other.1),
            channel(self.2, other.2),
        )
    }

    /// Wraps `text` in a 24-bit ANSI background colour.
    #[must_use]
    pub fn paint(self, text: &str) -> String {
        format!("\x1b[48;2;{};{};{}m{text}\x1b[0m", self.0, self.1, self.2)
    }
}

/// Colours a column of values from white (its minimum) to `high` (its
/// maximum). Missing values get no colour; a constant column is all white.
#[must_use]
pub fn gradient(values: &[Option<f64>], high: Rgb) -> Vec<Option<Rgb>> {
    let present = values.iter().flatten().copied();
    let min = present.clone().fold(f64::INFINITY, f64::min);
    let max = present.fold(f64::NEG_INFINITY, f64::max);
    let span = max - min;

    values
        .iter()
        .map(|value| {
            value.map(|v| {
                if span > 0.0 {
                    Rgb::WHITE.mix(high, (v - min) / span)
                } else {
                    Rgb::WHITE
                }
            })
        })
        .collect()
}

/// Marks, for each row of a plain diff result, the `col__1`/`col__2` cells
/// of the given columns whose values differ.
///
/// The mask is aligned with `result.columns`; columns not listed are never
/// highlighted.
pub fn highlight_diff<S: AsRef<str>>(
    result: &QueryResult,
    columns: &[S],
) -> Result<Vec<Vec<bool>>> {
    let pairs = columns
        .iter()
        .map(|column| {
            let column = column.as_ref();
            Ok((
                result.column_index(&format!("{column}__1"))?,
                result.column_index(&format!("{column}__2"))?,
            ))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(result
        .rows
        .iter()
        .map(|row| {
            let mut mask = vec![false; result.columns.len()];
            for &(left, right) in &pairs {
                let differs = row.get(left).and_then(|v| v.to_text())
                    != row.get(right).and_then(|v| v.to_text());
                if differs {
                    mask[left] = true;
                    mask[right] = true;
                }
            }
            mask
        })
        .collect())
}

/// Renders a result as an aligned text table.
#[must_use]
pub fn render_table(result: &QueryResult) -> String {
    render_colored_table(result, &[])
}

/// Renders a result as an aligned text table, painting the background of
/// every cell that has a colour.
///
/// `colors` is indexed like `result.rows`, then like `result.columns`;
/// missing entries are left unpainted.
#[must_use]
pub fn render_colored_table(result: &QueryResult, colors: &[Vec<Option<Rgb>>]) -> String {
    let cells: Vec<Vec<String>> = result
        .rows
        .iter()
        .map(|row| row.iter().map(ToString::to_string).collect())
        .collect();

    let mut widths: Vec<usize> = result.columns.iter().map(|c| c.chars().count()).collect();
    for row in &cells {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    // Padding stays outside the colour so alignment ignores escape codes.
    let line = |values: &[String], colors: &[Option<Rgb>]| {
        values
            .iter()
            .zip(&widths)
            .enumerate()
            .map(|(i, (value, width))| {
                let padding = " ".repeat(width.saturating_sub(value.chars().count()));
                match colors.get(i).copied().flatten() {
                    Some(color) => format!("{}{padding}", color.paint(value)),
                    None => format!("{value}{padding}"),
                }
            })
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut out = vec![
        line(&result.columns, &[]),
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    ];
    for (i, row) in cells.iter().enumerate() {
        out.push(line(row, colors.get(i).map_or(&[][..], Vec::as_slice)));
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::Value;

    #[test]
    fn test_format_percentage() {
        assert_eq!(format_percentage(0.1), "10.00%");
        assert_eq!(format_percentage(1.0), "100.00%");
        assert_eq!(format_percentage(0.123_45), "12.35%");
        assert_eq!(format_optional_percentage(None), "-");
        assert_eq!(format_optional_percentage(Some(0.0)), "0.00%");
    }

    #[test]
    fn test_gradient() {
        let colors = gradient(&[Some(0.0), Some(0.5), Some(1.0), None], Rgb::RED);
        assert_eq!(colors[0], Some(Rgb::WHITE));
        assert_eq!(colors[1].map(Rgb::to_hex).as_deref(), Some("#ff8080"));
        assert_eq!(colors[2], Some(Rgb::RED));
        assert_eq!(colors[3], None);

        let flat = gradient(&[Some(0.3), Some(0.3)], Rgb::BLUE);
        assert_eq!(flat, vec![Some(Rgb::WHITE), Some(Rgb::WHITE)]);
    }

    #[test]
    fn test_highlight_diff() {
        let result = QueryResult::new(["id", "a__1", "a__2", "b__1", "b__2"])
            .row([
                Value::Integer(1),
                Value::from("x"),
                Value::from("y"),
                Value::Integer(2),
                Value::Integer(2),
            ])
            .row([
                Value::Integer(2),
                Value::Null,
                Value::Null,
                Value::Null,
                Value::Integer(3),
            ]);

        let mask = highlight_diff(&result, &["a", "b"]).unwrap();
        assert_eq!(mask[0], vec![false, true, true, false, false]);
        assert_eq!(mask[1], vec![false, false, false, true, true]);

        assert!(highlight_diff(&result, &["c"]).is_err());
    }

    #[test]
    fn test_render_table() {
        let result = QueryResult::new(["id", "name"])
            .row([Value::Integer(1), Value::from("alice")])
            .row([Value::Integer(22), Value::Null]);

        assert_eq!(
            render_table(&result),
            "id | name\n---+------\n1  | alice\n22 | NULL"
        );
    }

    #[test]
    fn test_render_colored_table_keeps_alignment() {
        let result = QueryResult::new(["id", "name"])
            .row([Value::Integer(1), Value::from("alice")])
            .row([Value::Integer(22), Value::from("bo")]);
        let colors = vec![vec![None, Some(Rgb::RED)], vec![Some(Rgb::HIGHLIGHT)]];

        let rendered = render_colored_table(&result, &colors);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "id | name");
        assert_eq!(lines[2], "1  | \x1b[48;2;255;0;0malice\x1b[0m");
        assert_eq!(lines[3], "\x1b[48;2;252;159;186m22\x1b[0m | bo");
        assert_eq!(Rgb::HIGHLIGHT.to_hex(), "#fc9fba");

        assert_eq!(render_colored_table(&result, &[]), render_table(&result));
    }
}
