use csv::{QuoteStyle, ReaderBuilder, StringRecord, Terminator, Trim, WriterBuilder};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvRecord {
    /// 1-based source line where the record starts.
    pub line: u64,
    pub fields: Vec<String>,
}

fn is_blank(rec: &StringRecord) -> bool {
    rec.is_empty() || (rec.len() == 1 && rec.get(0).map(str::is_empty).unwrap_or(true))
}

/// Reads quote-aware CSV into trimmed records, skipping blank lines.
///
/// Quoted fields may carry commas, doubled quotes and line breaks. Records are
/// returned with whatever field count they have; column checks are the
/// caller's job.
pub fn read_records(text: &str) -> Result<Vec<CsvRecord>, csv::Error> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let mut out = Vec::new();
    let mut rec = StringRecord::new();
    while rdr.read_record(&mut rec)? {
        if is_blank(&rec) {
            continue;
        }
        let line = rec.position().map(|p| p.line()).unwrap_or(0);
        out.push(CsvRecord {
            line,
            fields: rec.iter().map(str::to_string).collect(),
        });
    }
    Ok(out)
}

/// Writes a header line plus rows, LF-terminated, quoting only where needed.
pub fn write_table<R, F>(header: &[&str], rows: R) -> Result<String, csv::Error>
where
    R: IntoIterator<Item = Vec<F>>,
    F: AsRef<[u8]>,
{
    let mut wtr = WriterBuilder::new()
        .quote_style(QuoteStyle::Necessary)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    wtr.write_record(header)?;
    for row in rows {
        wtr.write_record(row)?;
    }
    let bytes = wtr.into_inner().map_err(|e| e.into_error())?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
