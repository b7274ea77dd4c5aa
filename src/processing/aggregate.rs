//! Merge operators combining two records that share a key.

use std::collections::HashMap;

use tracing::trace;

use crate::types::{Aggregation, LOGS_FIELD};

use super::record::{FieldValue, Record};

/// Fold `donor` into `receiver` using `aggregation`.
///
/// `index` is the receiver's value -> position map for this slot, built lazily on the first
/// string union so repeated unions cost O(1) per value. Other aggregations ignore it.
pub(crate) fn merge_value(
    aggregation: Aggregation,
    receiver: &mut FieldValue,
    donor: FieldValue,
    index: &mut HashMap<String, usize>,
) {
    if matches!(receiver, FieldValue::Empty) && aggregation != Aggregation::Ratio {
        *receiver = donor;
        return;
    }

    match aggregation {
        Aggregation::None | Aggregation::Ratio => {}
        Aggregation::Union => match (receiver, donor) {
            (FieldValue::Strings(a), FieldValue::Strings(b)) => {
                let idx = string_index(index, a);
                for v in b {
                    if !idx.contains_key(&v) {
                        idx.insert(v.clone(), a.len());
                        a.push(v);
                    }
                }
            }
            (FieldValue::Ints(a), FieldValue::Ints(b)) => a.extend(b),
            (FieldValue::Floats(a), FieldValue::Floats(b)) => a.extend(b),
            (FieldValue::Bools(a), FieldValue::Bools(b)) => a.extend(b),
            _ => trace!("union on mismatched value kinds ignored"),
        },
        Aggregation::UnionCount => match (receiver, donor) {
            (
                FieldValue::CountedStrings { values, counts },
                FieldValue::CountedStrings {
                    values: dv,
                    counts: dc,
                },
            ) => {
                let idx = string_index(index, values);
                for (v, c) in dv.into_iter().zip(dc) {
                    match idx.get(&v) {
                        Some(&pos) => counts[pos] += c,
                        None => {
                            idx.insert(v.clone(), values.len());
                            values.push(v);
                            counts.push(c);
                        }
                    }
                }
            }
            _ => trace!("union_count on mismatched value kinds ignored"),
        },
        Aggregation::Sum => match (receiver, donor) {
            (FieldValue::Ints(a), FieldValue::Ints(b)) => fold_first(a, &b, |x, y| x.wrapping_add(y)),
            (FieldValue::Floats(a), FieldValue::Floats(b)) => fold_first(a, &b, |x, y| x + y),
            _ => trace!("sum on mismatched value kinds ignored"),
        },
        Aggregation::Max => match (receiver, donor) {
            (FieldValue::Ints(a), FieldValue::Ints(b)) => fold_first(a, &b, i64::max),
            (FieldValue::Floats(a), FieldValue::Floats(b)) => fold_first(a, &b, f64::max),
            _ => trace!("max on mismatched value kinds ignored"),
        },
        Aggregation::Mean | Aggregation::Variance => {
            if let (FieldValue::Moments(a), FieldValue::Moments(b)) = (receiver, donor) {
                a.absorb(&b);
            }
        }
        Aggregation::Count => {
            if let (FieldValue::Count(a), FieldValue::Count(b)) = (receiver, donor) {
                *a += b;
            }
        }
    }
}

fn fold_first<T: Copy>(a: &mut Vec<T>, b: &[T], f: impl Fn(T, T) -> T) {
    let Some(&first) = b.first() else {
        return;
    };
    match a.first_mut() {
        Some(x) => *x = f(*x, first),
        None => a.push(first),
    }
}

fn string_index<'a>(
    index: &'a mut HashMap<String, usize>,
    values: &[String],
) -> &'a mut HashMap<String, usize> {
    if index.is_empty() && !values.is_empty() {
        index.extend(values.iter().enumerate().map(|(i, v)| (v.clone(), i)));
    }
    index
}

impl Record {
    /// Fold `donor` into `self`; the donor is consumed.
    ///
    /// Key fields are left as they are (both records share the key). Schema fields merge by
    /// position using each field's aggregation; expanded sub-fields merge by name and are
    /// appended when new. Occurrences add up and retained lines are unioned.
    ///
    /// # Panics
    ///
    /// Panics if the records have different keys.
    pub fn merge(&mut self, donor: Record) {
        assert!(
            self.key == donor.key,
            "cannot merge record '{}' into record '{}'",
            donor.key,
            self.key
        );
        let Record {
            occurrences,
            values,
            extra,
            content,
            ..
        } = donor;

        let schema = std::sync::Arc::clone(&self.schema);
        for (slot, (def, dv)) in schema.fields.iter().zip(values).enumerate() {
            if def.key || !def.aggregation_type_matches() {
                continue;
            }
            let aggregation = def.effective_aggregation();
            let mut scratch = HashMap::new();
            let idx = if needs_index(aggregation) {
                self.string_index.entry(slot).or_default()
            } else {
                &mut scratch
            };
            merge_value(aggregation, &mut self.values[slot], dv, idx);
        }

        let base = schema.fields.len();
        for field in extra {
            match self.extra.iter().position(|e| e.def.name == field.def.name) {
                Some(pos) => {
                    let aggregation = field.def.aggregation;
                    let mut scratch = HashMap::new();
                    let idx = if needs_index(aggregation) {
                        self.string_index.entry(base + pos).or_default()
                    } else {
                        &mut scratch
                    };
                    merge_value(aggregation, &mut self.extra[pos].value, field.value, idx);
                }
                None => self.extra.push(field),
            }
        }

        self.occurrences += occurrences;

        if let Some(theirs) = content {
            match &mut self.content {
                Some(mine) => mine.absorb(theirs),
                None => self.content = Some(theirs),
            }
        }
    }

    /// Numeric value of a field as rendered, or the occurrence total for `logs`.
    ///
    /// Used to resolve ratio operands.
    pub fn rendered_number(&self, name: &str) -> Option<f64> {
        if name == LOGS_FIELD {
            return Some(self.occurrences as f64);
        }
        let idx = self.schema.index_of(name)?;
        let def = &self.schema.fields[idx];
        match (&self.values[idx], def.effective_aggregation()) {
            (FieldValue::Moments(m), Aggregation::Mean) => Some(m.mean()),
            (FieldValue::Moments(m), Aggregation::Variance) => Some(m.variance()),
            (v, _) => v.first_number(),
        }
    }

    /// `numerator / denominator` in single precision; `0.0` on a zero or missing denominator.
    pub fn ratio(&self, numerator: &str, denominator: &str) -> f32 {
        let num = self.rendered_number(numerator).unwrap_or(0.0) as f32;
        let den = self.rendered_number(denominator).unwrap_or(0.0) as f32;
        if den == 0.0 { 0.0 } else { num / den }
    }
}

fn needs_index(aggregation: Aggregation) -> bool {
    matches!(aggregation, Aggregation::Union | Aggregation::UnionCount)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::processing::content::{ContentRetention, RetainedContent};
    use crate::processing::record::{ExtraField, FieldValue, Moments, Record};
    use crate::types::{Aggregation, FieldDef, FieldType, Schema};

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            FieldDef::new("user", FieldType::String, 0).key(),
            FieldDef::new("hosts", FieldType::String, 1).with_aggregation(Aggregation::Union),
            FieldDef::new("cats", FieldType::String, 2).with_aggregation(Aggregation::UnionCount),
            FieldDef::new("bytes", FieldType::Int, 3).with_aggregation(Aggregation::Sum),
            FieldDef::new("peak", FieldType::Float, 4).with_aggregation(Aggregation::Max),
            FieldDef::new("lat", FieldType::Float, 5).with_aggregation(Aggregation::Mean),
            FieldDef::new("hits", FieldType::String, 6).with_aggregation(Aggregation::Count),
            FieldDef::new("codes", FieldType::Int, 7).with_aggregation(Aggregation::Union),
            FieldDef::new("r", FieldType::Float, -1).with_ratio("bytes", "logs"),
        ]))
    }

    fn line(host: &str, cat: &str, bytes: i64, peak: f64, lat: f64, code: i64) -> Record {
        Record::new(
            "alice",
            schema(),
            vec![
                FieldValue::Strings(vec!["alice".into()]),
                FieldValue::Strings(vec![host.into()]),
                FieldValue::CountedStrings {
                    values: vec![cat.into()],
                    counts: vec![1],
                },
                FieldValue::Ints(vec![bytes]),
                FieldValue::Floats(vec![peak]),
                FieldValue::Moments(Moments::of(lat)),
                FieldValue::Count(1),
                FieldValue::Ints(vec![code]),
                FieldValue::Empty,
            ],
        )
    }

    #[test]
    fn merge_applies_each_operator() {
        let mut a = line("a.com", "news", 10, 1.5, 2.0, 200);
        a.merge(line("b.com", "news", 5, 3.5, 4.0, 200));
        a.merge(line("a.com", "sport", 1, 0.5, 6.0, 404));

        assert_eq!(a.occurrences(), 3);
        assert_eq!(
            a.value("user"),
            Some(&FieldValue::Strings(vec!["alice".into()]))
        );
        assert_eq!(
            a.value("hosts"),
            Some(&FieldValue::Strings(vec!["a.com".into(), "b.com".into()]))
        );
        assert_eq!(
            a.value("cats"),
            Some(&FieldValue::CountedStrings {
                values: vec!["news".into(), "sport".into()],
                counts: vec![2, 1],
            })
        );
        assert_eq!(a.value("bytes"), Some(&FieldValue::Ints(vec![16])));
        assert_eq!(a.value("peak"), Some(&FieldValue::Floats(vec![3.5])));
        assert_eq!(a.rendered_number("lat"), Some(4.0));
        assert_eq!(a.value("hits"), Some(&FieldValue::Count(3)));
        assert_eq!(a.value("codes"), Some(&FieldValue::Ints(vec![200, 200, 404])));
        assert_eq!(a.value("r"), Some(&FieldValue::Empty));
        assert_eq!(a.ratio("bytes", "logs"), 16.0 / 3.0);
    }

    #[test]
    fn merge_is_associative_and_commutative_for_counts() {
        let build = |order: &[usize]| {
            let lines = [
                line("a", "x", 1, 1.0, 1.0, 1),
                line("b", "y", 2, 2.0, 2.0, 2),
                line("a", "x", 3, 3.0, 3.0, 3),
                line("c", "x", 4, 4.0, 4.0, 4),
            ];
            let mut it = order.iter().map(|&i| lines[i].clone());
            let mut acc = it.next().unwrap();
            for r in it {
                acc.merge(r);
            }
            acc
        };

        // ((0 + 1) + (2 + 3)) vs 3 + 2 + 1 + 0
        let mut left = build(&[0, 1]);
        left.merge(build(&[2, 3]));
        let right = build(&[3, 2, 1, 0]);

        for name in ["bytes", "peak", "hits"] {
            assert_eq!(left.value(name), right.value(name), "{name}");
        }
        let sorted_counts = |r: &Record| match r.value("cats").unwrap() {
            FieldValue::CountedStrings { values, counts } => {
                let mut pairs: Vec<_> = values.iter().cloned().zip(counts.iter().copied()).collect();
                pairs.sort();
                pairs
            }
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(sorted_counts(&left), sorted_counts(&right));
        assert_eq!(left.occurrences(), right.occurrences());
    }

    #[test]
    fn union_count_keeps_counts_aligned() {
        let mut a = line("a", "x", 0, 0.0, 0.0, 0);
        for cat in ["y", "x", "z", "y"] {
            a.merge(line("a", cat, 0, 0.0, 0.0, 0));
        }
        match a.value("cats").unwrap() {
            FieldValue::CountedStrings { values, counts } => {
                assert_eq!(values.len(), counts.len());
                assert_eq!(counts.iter().sum::<u64>(), 5);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn extra_fields_merge_by_name_and_append_when_new() {
        let extra = |name: &str, v: &str| ExtraField {
            def: FieldDef::new(name, FieldType::String, -1).with_aggregation(Aggregation::Union),
            value: FieldValue::Strings(vec![v.into()]),
        };
        let mut a = line("a", "x", 0, 0.0, 0.0, 0).with_extra_fields(vec![extra("ext_k", "1")]);
        a.merge(line("a", "x", 0, 0.0, 0.0, 0).with_extra_fields(vec![extra("ext_k", "2"), extra("ext_j", "9")]));
        assert_eq!(
            a.value("ext_k"),
            Some(&FieldValue::Strings(vec!["1".into(), "2".into()]))
        );
        assert_eq!(a.value("ext_j"), Some(&FieldValue::Strings(vec!["9".into()])));
    }

    #[test]
    fn mismatched_aggregation_is_left_alone() {
        let schema = Arc::new(Schema::new(vec![
            FieldDef::new("s", FieldType::String, 0).with_aggregation(Aggregation::Sum),
        ]));
        let mut a = Record::new("k", Arc::clone(&schema), vec![FieldValue::Empty]);
        a.merge(Record::new("k", schema, vec![FieldValue::Empty]));
        assert_eq!(a.value("s"), Some(&FieldValue::Empty));
        assert_eq!(a.occurrences(), 2);
    }

    #[test]
    fn retained_content_is_unioned() {
        let mut a = line("a", "x", 0, 0.0, 0.0, 0)
            .with_content(RetainedContent::from_line("l2", ContentRetention::Plain));
        a.merge(
            line("a", "x", 0, 0.0, 0.0, 0)
                .with_content(RetainedContent::from_line("l1", ContentRetention::Plain)),
        );
        assert_eq!(a.content().unwrap().text().unwrap(), "l1\nl2");
    }

    #[test]
    fn ratio_with_zero_denominator_is_zero() {
        let schema = Arc::new(Schema::new(vec![
            FieldDef::new("n", FieldType::Int, 0).with_aggregation(Aggregation::Sum),
            FieldDef::new("d", FieldType::Int, 1).with_aggregation(Aggregation::Sum),
        ]));
        let rec = Record::new(
            "k",
            schema,
            vec![FieldValue::Ints(vec![4]), FieldValue::Ints(vec![0])],
        );
        assert_eq!(rec.ratio("n", "d"), 0.0);
    }

    #[test]
    #[should_panic(expected = "cannot merge record")]
    fn merging_different_keys_panics() {
        let mut a = line("a", "x", 0, 0.0, 0.0, 0);
        let mut b = line("a", "x", 0, 0.0, 0.0, 0);
        b.key = "bob".into();
        a.merge(b);
    }
}
