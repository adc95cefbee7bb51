//! CSV readers for the emissions and actions tables.

use csv::{ReaderBuilder, StringRecord, Trim};

use crate::config::{ActionColumns, CsvOptions, EmissionColumns};
use crate::{ActionRecord, DashError, EmissionRecord};

/// Parse the emissions table from raw CSV bytes.
pub fn parse_emissions(
    input: &[u8],
    columns: &EmissionColumns,
    options: &CsvOptions,
) -> Result<Vec<EmissionRecord>, DashError> {
    let mut reader = reader(input, options)?;
    let headers = reader
        .headers()
        .map_err(|e| DashError::Csv(e.to_string()))?
        .clone();
    let year = find_column(&headers, &columns.year)?;
    let category = find_column(&headers, &columns.category)?;
    let subcategory = find_column(&headers, &columns.subcategory)?;
    let model_id = find_column(&headers, &columns.model_id)?;
    let emissions = find_column(&headers, &columns.emissions)?;

    let mut out = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let record = result.map_err(|e| DashError::Csv(e.to_string()))?;
        let row = idx + 1;
        out.push(EmissionRecord {
            year: parse_year(&record, year, &headers, row)?,
            category: text(&record, category),
            subcategory: text(&record, subcategory),
            model_id: text(&record, model_id),
            emissions_kg: parse_amount(&record, emissions, &headers, row, options)?,
        });
    }
    Ok(out)
}

/// Parse the actions table from raw CSV bytes. Row order is preserved.
pub fn parse_actions(
    input: &[u8],
    columns: &ActionColumns,
    options: &CsvOptions,
) -> Result<Vec<ActionRecord>, DashError> {
    let mut reader = reader(input, options)?;
    let headers = reader
        .headers()
        .map_err(|e| DashError::Csv(e.to_string()))?
        .clone();
    let year = find_column(&headers, &columns.year)?;
    let solution = find_column(&headers, &columns.solution)?;
    let reduction = find_column(&headers, &columns.reduction)?;

    let mut out = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let record = result.map_err(|e| DashError::Csv(e.to_string()))?;
        let row = idx + 1;
        out.push(ActionRecord {
            year: parse_year(&record, year, &headers, row)?,
            solution: text(&record, solution),
            reduction_kg: parse_amount(&record, reduction, &headers, row, options)?,
        });
    }
    Ok(out)
}

fn reader<'a>(input: &'a [u8], options: &CsvOptions) -> Result<csv::Reader<&'a [u8]>, DashError> {
    Ok(ReaderBuilder::new()
        .delimiter(options.delimiter_byte()?)
        .trim(Trim::All)
        .from_reader(input))
}

fn normalize_header(name: &str) -> String {
    name.trim_start_matches('\u{feff}').trim().to_lowercase()
}

fn find_column(headers: &StringRecord, aliases: &[String]) -> Result<usize, DashError> {
    let names: Vec<String> = headers.iter().map(normalize_header).collect();
    aliases
        .iter()
        .find_map(|alias| {
            let wanted = normalize_header(alias);
            names.iter().position(|name| *name == wanted)
        })
        .ok_or_else(|| DashError::MissingColumn(aliases.first().cloned().unwrap_or_default()))
}

fn text(record: &StringRecord, idx: usize) -> String {
    record.get(idx).unwrap_or("").to_string()
}

fn invalid(headers: &StringRecord, idx: usize, row: usize, value: &str) -> DashError {
    DashError::InvalidNumber {
        row,
        column: headers.get(idx).unwrap_or("").to_string(),
        value: value.to_string(),
    }
}

fn parse_year(
    record: &StringRecord,
    idx: usize,
    headers: &StringRecord,
    row: usize,
) -> Result<i32, DashError> {
    let raw = record.get(idx).unwrap_or("");
    if let Ok(year) = raw.parse::<i32>() {
        return Ok(year);
    }
    // Spreadsheet exports sometimes write integer years as `2023.0`.
    match raw.parse::<f64>() {
        Ok(v) if v.fract() == 0.0 && v.abs() <= i32::MAX as f64 => Ok(v as i32),
        _ => Err(invalid(headers, idx, row, raw)),
    }
}

/// Empty cells count as zero so totals behave like a NaN-skipping sum.
fn parse_amount(
    record: &StringRecord,
    idx: usize,
    headers: &StringRecord,
    row: usize,
    options: &CsvOptions,
) -> Result<f64, DashError> {
    let raw = record.get(idx).unwrap_or("");
    if raw.is_empty() {
        return Ok(0.0);
    }
    let parsed = if options.decimal_comma {
        let cleaned: String = raw
            .chars()
            .filter(|c| !matches!(c, ' ' | '\u{a0}' | '\u{202f}'))
            .map(|c| if c == ',' { '.' } else { c })
            .collect();
        cleaned.parse::<f64>()
    } else {
        raw.parse::<f64>()
    };
    parsed.map_err(|_| invalid(headers, idx, row, raw))
}

/// Serialize emission rows back to a comma-separated table with a header.
pub fn emissions_to_csv(rows: &[&EmissionRecord]) -> Result<String, DashError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer
            .serialize(row)
            .map_err(|e| DashError::Csv(e.to_string()))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| DashError::Csv(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| DashError::Csv(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filtered_rows_serialize_with_header() {
        let row = EmissionRecord {
            year: 2023,
            category: "Energy, heat".into(),
            subcategory: "Gas".into(),
            model_id: "boiler".into(),
            emissions_kg: 12.5,
        };
        let text = emissions_to_csv(&[&row]).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("year,category,subcategory,model_id,emissions_kg")
        );
        assert_eq!(lines.next(), Some("2023,\"Energy, heat\",Gas,boiler,12.5"));
        assert_eq!(lines.next(), None);
        let back = parse_emissions(
            text.as_bytes(),
            &EmissionColumns::default(),
            &CsvOptions::default(),
        )
        .unwrap();
        assert_eq!(back, vec![row]);
    }

    #[test]
    fn parses_short_headers() {
        let csv = "Year,Category,Subcategory,ModelID,Emissions\n\
                   2023,Energy,Electricity,E-1,120.5\n\
                   2022, Travel ,Flights,F-9,300\n";
        let rows = parse_emissions(
            csv.as_bytes(),
            &EmissionColumns::default(),
            &CsvOptions::default(),
        )
        .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].emissions_kg, 120.5);
        assert_eq!(rows[1].category, "Travel");
        assert_eq!(rows[1].model_id, "F-9");
    }

    #[test]
    fn parses_original_headers_with_semicolons_and_decimal_comma() {
        let csv = "\u{feff}Year;Catégorie Bilan Carbone;Sous-Catégorie Bilan Carbone;\
                   ModelID;GHG Emissions (kgCO2e)\n\
                   2023;Déplacements;Avion;M1;1 234,5\n\
                   2023.0;Énergie;Gaz;M2;\n";
        let options = CsvOptions {
            delimiter: ';',
            decimal_comma: true,
        };
        let rows = parse_emissions(csv.as_bytes(), &EmissionColumns::default(), &options).unwrap();
        assert_eq!(rows[0].category, "Déplacements");
        assert_eq!(rows[0].emissions_kg, 1234.5);
        assert_eq!(rows[1].year, 2023);
        assert_eq!(rows[1].emissions_kg, 0.0);
    }

    #[test]
    fn header_match_ignores_case() {
        let csv = "year,SOLUTION,reduction\n2030,Solar,-500\n2030,Insulation,-300\n";
        let rows = parse_actions(csv.as_bytes(), &ActionColumns::default(), &CsvOptions::default())
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].solution, "Solar");
        assert_eq!(rows[1].reduction_kg, -300.0);
    }

    #[test]
    fn missing_column_is_reported() {
        let csv = "Year,Solution\n2030,Solar\n";
        let err = parse_actions(csv.as_bytes(), &ActionColumns::default(), &CsvOptions::default())
            .unwrap_err();
        assert!(matches!(err, DashError::MissingColumn(ref name) if name == "Reduction"));
    }

    #[test]
    fn bad_number_names_row_and_column() {
        let csv = "Year,Solution,Reduction\n2030,Solar,-5\n2031,Wind,lots\n";
        let err = parse_actions(csv.as_bytes(), &ActionColumns::default(), &CsvOptions::default())
            .unwrap_err();
        match err {
            DashError::InvalidNumber { row, column, value } => {
                assert_eq!(row, 2);
                assert_eq!(column, "Reduction");
                assert_eq!(value, "lots");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn ragged_rows_are_csv_errors() {
        let csv = "Year,Solution,Reduction\n2030,Solar\n";
        let err = parse_actions(csv.as_bytes(), &ActionColumns::default(), &CsvOptions::default())
            .unwrap_err();
        assert!(matches!(err, DashError::Csv(_)));
    }
}
