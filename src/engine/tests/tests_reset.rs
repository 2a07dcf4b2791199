#[cfg(test)]
mod tests {
    use crate::engine::tests::helpers::{fill, open};
    use tempfile::TempDir;

    #[test]
    fn test_reset_in_memory_state() {
        let tmp = TempDir::new().unwrap();
        let mut engine = open(tmp.path());

        engine.put(1, b"one".to_vec()).unwrap();
        engine.put(2, b"two".to_vec()).unwrap();
        engine.reset().unwrap();

        assert_eq!(engine.get(1).unwrap(), b"");
        assert_eq!(engine.get(2).unwrap(), b"");
        assert!(engine.scan(0, 100).unwrap().is_empty());
    }

    #[test]
    fn test_reset_removes_sstables() {
        let tmp = TempDir::new().unwrap();
        let mut engine = open(tmp.path());
        fill(&mut engine, 2048);
        engine.scan(0, 0).unwrap();
        assert!(tmp.path().join("0").exists());

        engine.reset().unwrap();

        assert!(!tmp.path().join("0").exists());
        for key in (0..2048u64).step_by(101) {
            assert_eq!(engine.get(key).unwrap(), b"");
        }
    }

    #[test]
    fn test_reset_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let mut engine = open(tmp.path());
            fill(&mut engine, 2048);
            engine.reset().unwrap();
        }

        let engine = open(tmp.path());
        for key in (0..2048u64).step_by(101) {
            assert_eq!(engine.get(key).unwrap(), b"");
        }
    }

    #[test]
    fn test_store_usable_after_reset() {
        let tmp = TempDir::new().unwrap();
        let mut engine = open(tmp.path());

        engine.put(1, b"before".to_vec()).unwrap();
        engine.reset().unwrap();
        engine.put(1, b"after".to_vec()).unwrap();

        assert_eq!(engine.get(1).unwrap(), b"after");
        assert_eq!(engine.scan(0, 10).unwrap(), vec![(1, b"after".to_vec())]);
    }
}
