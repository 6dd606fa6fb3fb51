use proptest::prelude::*;
use recast_sdk::emission::EmissionBuffer;
use recast_types::{codec, EmissionLimits, Record};

proptest! {
    #[test]
    fn staged_totals_stay_within_limits(
        values in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..32),
        max_bytes in 1_usize..2048,
        max_records in 0_usize..16,
    ) {
        let mut buf = EmissionBuffer::new(EmissionLimits { max_bytes, max_records });
        let mut accepted = Vec::new();

        for value in values {
            let record = Record::from_value(value);
            let size = codec::encoded_len(&record);
            let full = buf.len() >= max_records;
            match buf.stage("out", &record) {
                Ok(()) => accepted.push(record),
                Err(err) => {
                    let structural = if full { max_records == 0 } else { size > max_bytes };
                    prop_assert_eq!(err.is_structural(), structural);
                    break;
                }
            }
            prop_assert!(buf.buffered_bytes() <= max_bytes);
            prop_assert!(buf.len() <= max_records);
        }

        let drained: Vec<Record> = buf
            .drain()
            .map(|(topic, payload)| {
                assert_eq!(topic, "out");
                codec::decode(&payload).unwrap()
            })
            .collect();
        prop_assert_eq!(drained, accepted);
        prop_assert!(buf.is_empty());
        prop_assert_eq!(buf.buffered_bytes(), 0);
    }
}
