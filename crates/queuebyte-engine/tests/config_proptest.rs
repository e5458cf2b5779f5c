use proptest::prelude::*;
use queuebyte_engine::config::{parser, validator};

fn consumer_yaml(width: usize, body_slot: usize, tag_slot: usize) -> String {
    format!(
        r#"
version: "1.0"
consumer: prop_layout
queue: orders
mode: transactional_batch
record:
  width: {width}
  body_slot: {body_slot}
  tag_slot: {tag_slot}
"#
    )
}

proptest! {
    #[test]
    fn slots_must_fit_inside_width(width in 1_usize..6, body in 0_usize..8, tag in 0_usize..8) {
        let config = parser::parse_consumer_str(&consumer_yaml(width, body, tag))
            .expect("generated yaml must parse");
        let result = validator::validate_consumer(&config);

        let fits = body < width && tag < width && body != tag;
        prop_assert_eq!(result.is_ok(), fits);
    }

    #[test]
    fn zero_wait_timeout_is_rejected(ms in 0_u64..3) {
        let yaml = format!(
            "version: '1.0'\nconsumer: c\nqueue: q\nwait_timeout_ms: {ms}\n"
        );
        let config = parser::parse_consumer_str(&yaml).expect("generated yaml must parse");
        prop_assert_eq!(validator::validate_consumer(&config).is_ok(), ms > 0);
    }
}
