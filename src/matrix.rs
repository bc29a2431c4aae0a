//! Dense row-major matrix with the whitespace text format used by
//! `dataset.bin`: a `rows cols` header line followed by row-major values.

use std::str::FromStr;

use crate::error::{Result, TreeboundError};

#[derive(Debug, Clone, PartialEq)]
pub struct Matrix<T> {
    rows: usize,
    columns: usize,
    data: Vec<T>,
}

impl<T: Clone + Default> Matrix<T> {
    pub fn new(rows: usize, columns: usize) -> Self {
        Matrix { rows, columns, data: vec![T::default(); rows * columns] }
    }
}

impl<T> Matrix<T> {
    #[inline(always)]
    pub fn n_rows(&self) -> usize {
        self.rows
    }

    #[inline(always)]
    pub fn n_columns(&self) -> usize {
        self.columns
    }

    #[inline(always)]
    pub fn get(&self, row: usize, column: usize) -> &T {
        debug_assert!(row < self.rows && column < self.columns);
        &self.data[row * self.columns + column]
    }

    #[inline(always)]
    pub fn set(&mut self, row: usize, column: usize, value: T) {
        debug_assert!(row < self.rows && column < self.columns);
        self.data[row * self.columns + column] = value;
    }
}

impl<T: Copy> Matrix<T> {
    #[inline(always)]
    pub fn at(&self, row: usize, column: usize) -> T {
        *self.get(row, column)
    }
}

/// Values that know how to appear in the text format. Booleans are written
/// as `1`/`0` so both matrix kinds share one parser.
pub trait TextValue: Sized {
    fn render(&self) -> String;
    fn parse(token: &str) -> Result<Self>;
}

impl TextValue for bool {
    fn render(&self) -> String {
        if *self { "1".to_string() } else { "0".to_string() }
    }

    fn parse(token: &str) -> Result<Self> {
        match token {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(TreeboundError::Parse(format!("expected 0 or 1, found {:?}", other))),
        }
    }
}

impl TextValue for f32 {
    fn render(&self) -> String {
        self.to_string()
    }

    fn parse(token: &str) -> Result<Self> {
        f32::from_str(token)
            .map_err(|e| TreeboundError::Parse(format!("bad float {:?}: {}", token, e)))
    }
}

impl<T: TextValue + Copy + Default> Matrix<T> {
    /// Renders the matrix in the text format, including the header line.
    pub fn write_text(&self, out: &mut String) {
        out.push_str(&format!("{} {}\n", self.rows, self.columns));
        for row in 0..self.rows {
            for column in 0..self.columns {
                out.push_str(&self.at(row, column).render());
                out.push(' ');
            }
            out.push('\n');
        }
    }

    /// Parses one matrix from a whitespace token stream.
    pub fn read_text<'a, I: Iterator<Item = &'a str>>(tokens: &mut I) -> Result<Self> {
        let rows = next_count(tokens, "matrix row count")?;
        let columns = next_count(tokens, "matrix column count")?;
        let mut matrix = Matrix::new(rows, columns);
        for row in 0..rows {
            for column in 0..columns {
                let token = tokens
                    .next()
                    .ok_or_else(|| TreeboundError::Parse("matrix data ended early".to_string()))?;
                matrix.set(row, column, T::parse(token)?);
            }
        }
        Ok(matrix)
    }
}

fn next_count<'a, I: Iterator<Item = &'a str>>(tokens: &mut I, what: &str) -> Result<usize> {
    let token =
        tokens.next().ok_or_else(|| TreeboundError::Parse(format!("missing {}", what)))?;
    usize::from_str(token)
        .map_err(|e| TreeboundError::Parse(format!("bad {} {:?}: {}", what, token, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_matrix_round_trip() {
        let mut m = Matrix::<bool>::new(2, 3);
        m.set(0, 1, true);
        m.set(1, 2, true);

        let mut text = String::new();
        m.write_text(&mut text);
        let mut tokens = text.split_whitespace();
        let back = Matrix::<bool>::read_text(&mut tokens).unwrap();
        assert_eq!(m, back);
    }

    #[test]
    fn float_matrix_round_trip() {
        let mut m = Matrix::<f32>::new(2, 2);
        m.set(0, 0, 0.0);
        m.set(0, 1, 0.25);
        m.set(1, 0, 1.5);
        m.set(1, 1, 0.125);

        let mut text = String::new();
        m.write_text(&mut text);
        let mut tokens = text.split_whitespace();
        let back = Matrix::<f32>::read_text(&mut tokens).unwrap();
        assert_eq!(m, back);
    }

    #[test]
    fn truncated_stream_is_an_error() {
        let mut tokens = "2 2 1 0 1".split_whitespace();
        assert!(Matrix::<bool>::read_text(&mut tokens).is_err());
    }
}
