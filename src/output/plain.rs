use std::io::Write;

use crate::error::CompactResult;
use crate::processing::record::Record;

/// Write one `key - occurrences` line per record.
pub fn write_records<'a, W: Write>(
    records: impl IntoIterator<Item = &'a Record>,
    mut writer: W,
) -> CompactResult<()> {
    for record in records {
        writeln!(writer, "{} - {}", record.key(), record.occurrences())?;
    }
    writer.flush()?;
    Ok(())
}
