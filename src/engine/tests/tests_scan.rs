#[cfg(test)]
mod tests {
    use crate::engine::tests::helpers::{fill, open, svalue};
    use tempfile::TempDir;

    #[test]
    fn test_scan_after_delete() {
        let tmp = TempDir::new().unwrap();
        let mut engine = open(tmp.path());

        for key in 0..512u64 {
            engine.put(key, svalue(key)).unwrap();
        }
        for key in (0..512u64).step_by(2) {
            assert!(engine.del(key).unwrap());
        }

        let pairs = engine.scan(0, 512).unwrap();
        assert_eq!(pairs.len(), 256);
        for (i, (key, value)) in pairs.iter().enumerate() {
            assert_eq!(*key, 2 * i as u64 + 1);
            assert_eq!(*value, svalue(*key));
        }
    }

    #[test]
    fn test_scan_is_strictly_ascending_and_bounded() {
        let tmp = TempDir::new().unwrap();
        let mut engine = open(tmp.path());
        for key in [40u64, 10, 30, 20, 50] {
            engine.put(key, svalue(key)).unwrap();
        }

        let pairs = engine.scan(15, 45).unwrap();
        let keys: Vec<u64> = pairs.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![20, 30, 40]);
    }

    #[test]
    fn test_scan_empty_store() {
        let tmp = TempDir::new().unwrap();
        let mut engine = open(tmp.path());
        assert!(engine.scan(0, u64::MAX - 1).unwrap().is_empty());
    }

    #[test]
    fn test_scan_merges_memory_and_disk() {
        let tmp = TempDir::new().unwrap();
        let mut engine = open(tmp.path());

        // Cross the rotation threshold so part of the data is on disk,
        // then overwrite and delete a few keys in the fresh memtable.
        fill(&mut engine, 2048);
        engine.put(4, b"updated".to_vec()).unwrap();
        engine.del(6).unwrap();

        let pairs = engine.scan(0, 9).unwrap();
        let keys: Vec<u64> = pairs.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![0, 1, 2, 3, 4, 5, 7, 8, 9]);
        for (key, value) in pairs {
            if key == 4 {
                assert_eq!(value, b"updated");
            } else {
                assert_eq!(value, svalue(key));
            }
        }
    }

    #[test]
    fn test_scan_single_key_range() {
        let tmp = TempDir::new().unwrap();
        let mut engine = open(tmp.path());
        engine.put(5, b"only".to_vec()).unwrap();

        assert_eq!(engine.scan(5, 5).unwrap(), vec![(5, b"only".to_vec())]);
        assert!(engine.scan(4, 4).unwrap().is_empty());
    }

    #[test]
    fn test_scan_sees_every_tier_once() {
        let tmp = TempDir::new().unwrap();
        let mut engine = open(tmp.path());

        // Key 0 ends up on disk and is then overwritten in memory; the
        // scan must return the newest version exactly once.
        fill(&mut engine, 2048);
        engine.scan(0, 0).unwrap();
        engine.put(0, b"newest".to_vec()).unwrap();

        let pairs = engine.scan(0, 0).unwrap();
        assert_eq!(pairs, vec![(0, b"newest".to_vec())]);
    }
}
