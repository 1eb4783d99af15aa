// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Integration tests for the external sort pipeline.

mod common;

use common::{budget, int_source, int_spec, payload_row_ids};
use rand::seq::SliceRandom;

use novasort::sort::{AddonField, ColumnKind, PayloadPolicy, SortKeyPart};
use novasort::{CancelToken, Datum, SortSpec, Sorter, VecRowSource};

#[test]
fn spilled_sort_matches_in_memory_baseline() {
    // 10,000 16-byte records against a 64 KB budget: the 4096-record buffer
    // must spill at least twice.
    let mut values: Vec<i64> = (0..10_000).collect();
    values.shuffle(&mut rand::rng());

    let mut sorter = Sorter::new(int_spec(), budget(64 * 1024, 10_000)).unwrap();
    let mut source = int_source(&values);
    let mut result = sorter.run(&mut source, &CancelToken::new()).unwrap();

    assert!(!result.is_in_memory(), "a spilled sort materializes as a stream");
    assert!(sorter.profile().spilled_runs >= 2);
    assert_eq!(sorter.profile().examined_rows, 10_000);
    assert_eq!(sorter.profile().returned_rows, 10_000);

    let payloads = result.payloads().unwrap();
    let sorted: Vec<i64> = payload_row_ids(&payloads)
        .iter()
        .map(|id| values[*id as usize])
        .collect();
    let mut baseline = values.clone();
    baseline.sort_unstable();
    assert_eq!(sorted, baseline);
}

#[test]
fn stream_result_rescans_identically() {
    let mut values: Vec<i64> = (0..5_000).rev().collect();
    values.shuffle(&mut rand::rng());
    let mut sorter = Sorter::new(int_spec(), budget(16 * 1024, 5_000)).unwrap();
    let mut source = int_source(&values);
    let mut result = sorter.run(&mut source, &CancelToken::new()).unwrap();
    assert!(!result.is_in_memory());

    let first = result.payloads().unwrap();
    let second = result.payloads().unwrap();
    assert_eq!(first, second);
}

#[test]
fn top_k_path_returns_the_smallest_rows() {
    let mut values: Vec<i64> = (0..50_000).collect();
    values.shuffle(&mut rand::rng());

    let mut spec = int_spec();
    spec.limit = Some(10);
    let mut sorter = Sorter::new(spec, budget(8 << 20, 50_000)).unwrap();
    let mut source = int_source(&values);
    let mut result = sorter.run(&mut source, &CancelToken::new()).unwrap();

    assert!(sorter.profile().used_topn);
    assert!(result.is_in_memory(), "the selector never spills");
    let sorted: Vec<i64> = payload_row_ids(&result.payloads().unwrap())
        .iter()
        .map(|id| values[*id as usize])
        .collect();
    assert_eq!(sorted, (0..10).collect::<Vec<i64>>());
}

#[test]
fn limit_with_ties_keeps_the_boundary_group() {
    let keys = [1i64, 1, 2, 2, 2, 3, 3];

    // Rank 5 lands on key 2 and every 2 already sits inside the limit, so
    // exactly the five rows with keys <= 2 come back.
    let mut spec = int_spec();
    spec.limit = Some(5);
    spec.with_ties = true;
    let mut sorter = Sorter::new(spec, budget(1 << 20, keys.len() as u64)).unwrap();
    let mut result = sorter
        .run(&mut int_source(&keys), &CancelToken::new())
        .unwrap();
    let emitted: Vec<i64> = payload_row_ids(&result.payloads().unwrap())
        .iter()
        .map(|id| keys[*id as usize])
        .collect();
    assert_eq!(emitted, vec![1, 1, 2, 2, 2]);

    // Rank 6 lands on key 3: its tie at rank 7 must come along.
    let mut spec = int_spec();
    spec.limit = Some(6);
    spec.with_ties = true;
    let mut sorter = Sorter::new(spec, budget(1 << 20, keys.len() as u64)).unwrap();
    let mut result = sorter
        .run(&mut int_source(&keys), &CancelToken::new())
        .unwrap();
    let emitted: Vec<i64> = payload_row_ids(&result.payloads().unwrap())
        .iter()
        .map(|id| keys[*id as usize])
        .collect();
    assert_eq!(emitted, vec![1, 1, 2, 2, 2, 3, 3]);

    // Rank 4 cuts inside the 2s: the tying third 2 is kept as well.
    let mut spec = int_spec();
    spec.limit = Some(4);
    spec.with_ties = true;
    let mut sorter = Sorter::new(spec, budget(1 << 20, keys.len() as u64)).unwrap();
    let mut result = sorter
        .run(&mut int_source(&keys), &CancelToken::new())
        .unwrap();
    let emitted: Vec<i64> = payload_row_ids(&result.payloads().unwrap())
        .iter()
        .map(|id| keys[*id as usize])
        .collect();
    assert_eq!(emitted, vec![1, 1, 2, 2, 2]);
}

#[test]
fn addon_payload_round_trips_through_a_spilled_sort() {
    let rows: Vec<Vec<Datum>> = (0..3_000)
        .map(|i| {
            let key = (3_000 - i) as i64;
            let label = if i % 7 == 0 {
                Datum::Null
            } else {
                Datum::Bytes(format!("row-{key:05}").into_bytes())
            };
            vec![Datum::Int(key), label]
        })
        .collect();

    let spec = SortSpec::new(
        vec![SortKeyPart::ascending(0, ColumnKind::Int)],
        PayloadPolicy::Addon(vec![
            AddonField {
                column: 0,
                kind: ColumnKind::Int,
                nullable: false,
            },
            AddonField {
                column: 1,
                kind: ColumnKind::Bytes { max_len: 32 },
                nullable: true,
            },
        ]),
    );
    let mut sorter = Sorter::new(spec, budget(16 * 1024, 3_000)).unwrap();
    let mut source = VecRowSource::from_columns(rows.clone());
    let mut result = sorter.run(&mut source, &CancelToken::new()).unwrap();

    assert!(!result.is_in_memory());
    assert!(sorter.profile().packed_addons, "wide nullable addons pack");

    let payloads = result.payloads().unwrap();
    assert_eq!(payloads.len(), 3_000);
    let novasort::SortedResult::Stream(stream) = &result else {
        panic!("spilled sort must stream");
    };
    let mut previous_key = i64::MIN;
    for payload in &payloads {
        let values = stream.decode_addon(payload).unwrap();
        let Datum::Int(key) = values[0] else {
            panic!("addon key column must decode as Int");
        };
        assert!(key >= previous_key);
        previous_key = key;
        // The addon copy must match the original row bit for bit.
        assert_eq!(values, rows[(3_000 - key) as usize]);
    }
}

#[test]
fn packed_sort_keys_keep_the_same_order_as_fixed() {
    // Wide variable keys cross the packing threshold; narrow ones stay
    // fixed. Both orderings must agree on the same logical rows.
    let words: Vec<String> = (0..2_000)
        .map(|i| format!("{:03}-suffix-{}", i % 97, i))
        .collect();

    let run = |max_len: usize, memory: usize| -> (bool, Vec<String>) {
        let rows: Vec<Vec<Datum>> = words
            .iter()
            .map(|w| vec![Datum::Bytes(w.clone().into_bytes())])
            .collect();
        let spec = SortSpec::new(
            vec![SortKeyPart::ascending(0, ColumnKind::Bytes { max_len })],
            PayloadPolicy::BackRef,
        );
        let mut sorter = Sorter::new(spec, budget(memory, 2_000)).unwrap();
        let mut source = VecRowSource::from_columns(rows);
        let mut result = sorter.run(&mut source, &CancelToken::new()).unwrap();
        let ordered: Vec<String> = payload_row_ids(&result.payloads().unwrap())
            .iter()
            .map(|id| words[*id as usize].clone())
            .collect();
        (sorter.profile().packed_sort_keys, ordered)
    };

    let (packed, packed_order) = run(300, 64 * 1024);
    let (fixed, fixed_order) = run(32, 64 * 1024);
    assert!(packed, "300-byte variable keys cross the packing threshold");
    assert!(!fixed, "32-byte variable keys stay mem-comparable");
    assert_eq!(packed_order, fixed_order);

    let mut baseline = words.clone();
    baseline.sort_unstable();
    assert_eq!(packed_order, baseline);
}

#[test]
fn cancellation_mid_operation_is_reported_as_cancelled() {
    struct CancellingSource {
        inner: VecRowSource,
        after: u64,
        seen: u64,
        token: CancelToken,
    }
    impl novasort::RowSource for CancellingSource {
        fn next_row(
            &mut self,
        ) -> Result<Option<novasort::SourceRow>, novasort::SortError> {
            self.seen += 1;
            if self.seen == self.after {
                self.token.cancel();
            }
            self.inner.next_row()
        }
    }

    let values: Vec<i64> = (0..1_000).collect();
    let token = CancelToken::new();
    let mut source = CancellingSource {
        inner: int_source(&values),
        after: 500,
        seen: 0,
        token: token.clone(),
    };
    let mut sorter = Sorter::new(int_spec(), budget(1 << 20, 1_000)).unwrap();
    let err = sorter.run(&mut source, &token).unwrap_err();
    assert!(err.is_cancelled());
}
