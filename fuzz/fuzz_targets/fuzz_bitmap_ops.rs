#![no_main]
use ipalloc_rs::AllocationBitmap;
use libfuzzer_sys::{arbitrary::{Arbitrary, Unstructured}, fuzz_target};
use std::collections::BTreeSet;

#[derive(Debug, Arbitrary)]
enum BitOp {
    Allocate(u16),
    AllocateNext,
    Release(u16),
}

// Bitmap state must agree with a set model after any operation sequence
// and survive an encode/decode pass unchanged
fuzz_target!(|input: &[u8]| {
    let mut u = Unstructured::new(input);

    let capacity = match u.int_in_range::<usize>(1..=2048) {
        Ok(c) => c,
        Err(_) => return,
    };
    let ops: Vec<BitOp> = match u.arbitrary() {
        Ok(ops) => ops,
        Err(_) => return,
    };

    let mut bitmap = AllocationBitmap::new(capacity);
    let mut model = BTreeSet::new();

    for op in ops.iter().take(256) {
        match *op {
            BitOp::Allocate(raw) => {
                let offset = raw as usize % capacity;
                assert_eq!(bitmap.allocate(offset).is_ok(), model.insert(offset));
            }
            BitOp::AllocateNext => {
                let expected = (0..capacity).find(|o| !model.contains(o));
                let got = bitmap.allocate_next();
                assert_eq!(got, expected);
                if let Some(offset) = got {
                    model.insert(offset);
                }
            }
            BitOp::Release(raw) => {
                let offset = raw as usize % capacity;
                bitmap.release(offset);
                model.remove(&offset);
            }
        }
    }

    assert_eq!(bitmap.used(), model.len());
    let decoded = AllocationBitmap::from_bytes(capacity, &bitmap.to_bytes()).unwrap();
    assert_eq!(decoded, bitmap);
});
