//! XLSX output: one worksheet, bold header row, typed cells.

use std::path::Path;

use rust_xlsxwriter::{ColNum, Format, RowNum, Workbook, Worksheet, XlsxError};
use serde_json::Value;

use crate::models::Table;
use crate::{FetchportError, Result};

pub(super) fn write_xlsx(table: &Table, path: &Path) -> Result<()> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    fill_worksheet(worksheet, table)
        .map_err(|e| FetchportError::export("Failed to fill worksheet", e))?;

    workbook
        .save(path)
        .map_err(|e| FetchportError::export(format!("Failed to save {}", path.display()), e))
}

fn fill_worksheet(worksheet: &mut Worksheet, table: &Table) -> std::result::Result<(), XlsxError> {
    let header = Format::new().set_bold();
    for (col, name) in table.columns().iter().enumerate() {
        worksheet.write_string_with_format(0, col_num(col)?, name, &header)?;
    }

    for (index, row) in table.rows().iter().enumerate() {
        let row_num = RowNum::try_from(index + 1).map_err(|_| XlsxError::RowColumnLimitError)?;
        for (col, value) in row.iter().enumerate() {
            let col = col_num(col)?;
            match value {
                Value::Null => {}
                Value::Bool(b) => {
                    worksheet.write_boolean(row_num, col, *b)?;
                }
                Value::Number(n) => match n.as_f64() {
                    Some(f) => {
                        worksheet.write_number(row_num, col, f)?;
                    }
                    None => {
                        worksheet.write_string(row_num, col, n.to_string())?;
                    }
                },
                Value::String(s) => {
                    worksheet.write_string(row_num, col, s)?;
                }
                other => {
                    worksheet.write_string(row_num, col, other.to_string())?;
                }
            }
        }
    }
    Ok(())
}

fn col_num(index: usize) -> std::result::Result<ColNum, XlsxError> {
    ColNum::try_from(index).map_err(|_| XlsxError::RowColumnLimitError)
}
