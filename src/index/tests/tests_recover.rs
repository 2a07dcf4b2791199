#[cfg(test)]
mod tests {
    use crate::filter::Filter;
    use crate::index::Index;
    use crate::memtable::Record;
    use crate::sstable::write_table;
    use std::fs;
    use tempfile::TempDir;

    fn record(key: u64, value: &[u8]) -> Record {
        Record {
            key,
            value: value.to_vec(),
            deleted: false,
        }
    }

    #[test]
    fn test_recover_rebuilds_entries_and_filter() {
        let tmp = TempDir::new().unwrap();
        let level_dir = tmp.path().join("0");
        fs::create_dir_all(&level_dir).unwrap();
        write_table(
            &level_dir.join("1000"),
            &[record(1, b"one"), record(2, b"two")],
        )
        .unwrap();

        let mut index = Index::new();
        let mut filter = Filter::new();
        index.recover(tmp.path(), &mut filter).unwrap();

        let hit = index.get(1).expect("hit");
        assert_eq!(hit.level, 0);
        assert_eq!(hit.file_id, 1000);
        assert_eq!(hit.length, 3);
        assert!(!hit.deleted);

        assert!(filter.contains(1, 0, 1000));
        assert!(filter.contains(2, 0, 1000));
        assert!(!filter.contains(3, 0, 1000));
    }

    #[test]
    fn test_recover_multiple_levels() {
        let tmp = TempDir::new().unwrap();
        for (level, file_id, key) in [(0u32, 2000u64, 10u64), (1, 1000, 20)] {
            let dir = tmp.path().join(level.to_string());
            fs::create_dir_all(&dir).unwrap();
            write_table(&dir.join(file_id.to_string()), &[record(key, b"v")]).unwrap();
        }

        let mut index = Index::new();
        let mut filter = Filter::new();
        index.recover(tmp.path(), &mut filter).unwrap();

        assert_eq!(index.get(10).expect("hit").level, 0);
        assert_eq!(index.get(20).expect("hit").level, 1);
    }

    #[test]
    fn test_recover_ignores_wal_files() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("wal"), b"not a level").unwrap();
        fs::write(tmp.path().join("immwal"), b"not a level").unwrap();
        let level_dir = tmp.path().join("0");
        fs::create_dir_all(&level_dir).unwrap();
        write_table(&level_dir.join("1000"), &[record(1, b"v")]).unwrap();

        let mut index = Index::new();
        let mut filter = Filter::new();
        index.recover(tmp.path(), &mut filter).unwrap();
        assert!(index.get(1).is_some());
    }

    #[test]
    fn test_recover_skips_corrupt_table() {
        let tmp = TempDir::new().unwrap();
        let level_dir = tmp.path().join("0");
        fs::create_dir_all(&level_dir).unwrap();
        write_table(&level_dir.join("1000"), &[record(1, b"good")]).unwrap();
        fs::write(level_dir.join("2000"), 12345u64.to_le_bytes()).unwrap();

        let mut index = Index::new();
        let mut filter = Filter::new();
        index.recover(tmp.path(), &mut filter).unwrap();

        // The intact table recovered; the corrupt one contributed nothing.
        assert_eq!(index.get(1).expect("hit").file_id, 1000);
        assert_eq!(index.file_count(0), 1);
    }

    #[test]
    fn test_recover_missing_dir_is_empty() {
        let tmp = TempDir::new().unwrap();
        let mut index = Index::new();
        let mut filter = Filter::new();
        index
            .recover(&tmp.path().join("nowhere"), &mut filter)
            .unwrap();
        assert!(index.get(1).is_none());
    }

    #[test]
    fn test_recovered_timestamps_follow_file_ids() {
        let tmp = TempDir::new().unwrap();
        let level_dir = tmp.path().join("0");
        fs::create_dir_all(&level_dir).unwrap();
        // Same key in two files; the newer file must win the lookup.
        write_table(&level_dir.join("1000"), &[record(7, b"old")]).unwrap();
        write_table(&level_dir.join("2000"), &[record(7, b"new")]).unwrap();

        let mut index = Index::new();
        let mut filter = Filter::new();
        index.recover(tmp.path(), &mut filter).unwrap();

        let hit = index.get(7).expect("hit");
        assert_eq!(hit.file_id, 2000);
    }
}
