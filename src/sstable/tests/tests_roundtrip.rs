#[cfg(test)]
mod tests {
    use crate::memtable::Record;
    use crate::sstable::{Table, write_table};
    use tempfile::TempDir;

    fn record(key: u64, value: &[u8], deleted: bool) -> Record {
        Record {
            key,
            value: value.to_vec(),
            deleted,
        }
    }

    #[test]
    fn test_footer_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("1000");

        let records = vec![
            record(1, b"one", false),
            record(2, b"", true),
            record(5, b"five", false),
            record(9, b"nine-nine", false),
        ];
        let written = write_table(&path, &records).unwrap();

        let table = Table::open(&path).unwrap();
        assert_eq!(table.record_count(), 4);

        let recovered = table.entries().unwrap();
        assert_eq!(recovered, written);
        for (entry, source) in recovered.iter().zip(&records) {
            assert_eq!(entry.key, source.key);
            assert_eq!(entry.length, source.value.len() as u64);
        }
    }

    #[test]
    fn test_value_at_returns_exact_bytes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("1000");

        let records = vec![
            record(10, b"alpha", false),
            record(20, b"", false),
            record(30, b"gamma", false),
        ];
        let entries = write_table(&path, &records).unwrap();

        let table = Table::open(&path).unwrap();
        assert_eq!(table.value_at(entries[0].offset).unwrap(), b"alpha");
        assert_eq!(table.value_at(entries[1].offset).unwrap(), b"");
        assert_eq!(table.value_at(entries[2].offset).unwrap(), b"gamma");
    }

    #[test]
    fn test_offsets_account_for_layout() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("1000");

        let records = vec![record(1, b"ab", false), record(2, b"cdef", false)];
        let entries = write_table(&path, &records).unwrap();

        // First record at 0; second after key(8) + "ab"(2) + terminator(1).
        assert_eq!(entries[0].offset, 0);
        assert_eq!(entries[1].offset, 11);

        // File = body (11 + 13) + footer (16 per record) + count.
        let file_len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(file_len, 24 + 2 * 16 + 8);
    }

    #[test]
    fn test_single_record_table() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("1");

        let entries = write_table(&path, &[record(42, b"x", false)]).unwrap();
        let table = Table::open(&path).unwrap();
        assert_eq!(table.record_count(), 1);
        assert_eq!(table.entries().unwrap(), entries);
        assert_eq!(table.value_at(0).unwrap(), b"x");
    }

    #[test]
    fn test_large_table_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("1000");

        let records: Vec<Record> = (0..2048u64)
            .map(|i| record(i, format!("value-{i}").as_bytes(), i % 5 == 0))
            .collect();
        let written = write_table(&path, &records).unwrap();

        let table = Table::open(&path).unwrap();
        let recovered = table.entries().unwrap();
        assert_eq!(recovered.len(), 2048);
        assert_eq!(recovered, written);

        for entry in &recovered {
            assert_eq!(
                table.value_at(entry.offset).unwrap(),
                format!("value-{}", entry.key).as_bytes()
            );
        }
    }
}
