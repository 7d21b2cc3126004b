//! Turning alignment records into footprints, dedup keys, and variations.
//!
//! The footprint itself lives in [`crate::model::region`]; this module owns
//! everything that needs the read sequence: reconstructing the aligned
//! reference from the MD tag, walking the CIGAR to extract [`Variation`]s in
//! the target region's induced coordinate frame, and building the dedup keys
//! the aggregation factory groups by.
//!
//! Reference evidence is resolved in priority order: an explicit variant tag
//! on the record, an explicit genomic sequence handed in by the caller, the
//! MD tag, and finally CIGAR-only extraction (indels and soft-clips, no
//! mismatch calls).

pub mod md;

use bio::alphabets::dna;
use rust_htslib::bam::record::{Aux, Cigar, Record};

use crate::core::error::{RegataError, Result};
use crate::model::{ReadRegion, Variation};
use md::MdOp;

/// Where reference bases for mismatch/deletion calls come from.
pub enum ReferenceBases<'a> {
    /// No reference information available.
    Unknown,
    /// Reference bases aligned to the record's footprint, in order.
    Aligned(Vec<u8>),
    /// A genomic sequence slice whose first base sits at `offset`.
    Genome { seq: &'a [u8], offset: i64 },
}

/// Number of reference bases the CIGAR covers (M/=/X and D).
pub fn covered_length<'a, I>(ops: I) -> u32
where
    I: IntoIterator<Item = &'a Cigar>,
{
    ops.into_iter()
        .map(|op| match *op {
            Cigar::Match(l) | Cigar::Equal(l) | Cigar::Diff(l) | Cigar::Del(l) => l,
            _ => 0,
        })
        .sum()
}

/// The record's CIGAR as text, e.g. `3M1I2M`.
pub fn cigar_text(record: &Record) -> String {
    record
        .cigar()
        .iter()
        .map(|op| format!("{}{}", op.len(), op.char()))
        .collect()
}

/// Dedup key for one record: CIGAR text plus variant evidence. Records with
/// identical keys collapse into one distinct sequence. The evidence part is
/// the explicit variant tag when present, the MD tag otherwise, and the raw
/// read sequence as a last resort.
pub fn dedup_key(record: &Record, variant_tag: &[u8; 2]) -> String {
    let evidence = match record.aux(variant_tag) {
        Ok(Aux::String(s)) => s.to_string(),
        _ => match record.aux(b"MD") {
            Ok(Aux::String(md)) => md.to_string(),
            _ => String::from_utf8_lossy(&record.seq().as_bytes()).into_owned(),
        },
    };
    format!("{}:{}", cigar_text(record), evidence)
}

/// Dedup key for a mate pair: both mates' keys concatenated in position
/// order.
pub fn pair_dedup_key(
    first: &Record,
    second: &Record,
    variant_tag: &[u8; 2],
) -> String {
    let k1 = dedup_key(first, variant_tag);
    let k2 = dedup_key(second, variant_tag);
    if first.pos() <= second.pos() {
        format!("{}|{}", k1, k2)
    } else {
        format!("{}|{}", k2, k1)
    }
}

/// Reconstruct the reference bases aligned to the record's footprint from
/// its MD tag. Returns `None` when the record carries no MD tag.
pub fn aligned_reference(record: &Record) -> Result<Option<Vec<u8>>> {
    let md = match record.aux(b"MD") {
        Ok(Aux::String(s)) => s.to_string(),
        _ => return Ok(None),
    };
    let seq = record.seq().as_bytes();
    let mut ops = md::parse_md(&md)?.into_iter();
    let mut cur = ops.next();
    let mut out = Vec::with_capacity(seq.len());
    let mut read_pos = 0usize;
    for op in record.cigar().iter() {
        match *op {
            Cigar::Match(l) | Cigar::Equal(l) | Cigar::Diff(l) => {
                let mut remaining = l as usize;
                while remaining > 0 {
                    match cur.take() {
                        Some(MdOp::Matches(n)) => {
                            let take = remaining.min(n as usize);
                            out.extend(
                                seq[read_pos..read_pos + take]
                                    .iter()
                                    .map(|b| b.to_ascii_uppercase()),
                            );
                            read_pos += take;
                            remaining -= take;
                            cur = if n as usize > take {
                                Some(MdOp::Matches(n - take as u32))
                            } else {
                                ops.next()
                            };
                        }
                        Some(MdOp::Mismatch(base)) => {
                            out.push(base);
                            read_pos += 1;
                            remaining -= 1;
                            cur = ops.next();
                        }
                        _ => return Err(RegataError::InvalidMdTag(md)),
                    }
                }
            }
            Cigar::Del(l) => match cur.take() {
                Some(MdOp::Deletion(bases)) if bases.len() == l as usize => {
                    out.extend_from_slice(&bases);
                    cur = ops.next();
                }
                _ => return Err(RegataError::InvalidMdTag(md)),
            },
            Cigar::Ins(l) | Cigar::SoftClip(l) => {
                read_pos += l as usize;
            }
            Cigar::RefSkip(_) | Cigar::HardClip(_) | Cigar::Pad(_) => {}
        }
    }
    Ok(Some(out))
}

/// Extract all variations of `record` against `region`.
///
/// Uses the explicit variant tag when present (tokens are re-anchored from
/// the record's own frame into `region`'s), otherwise walks the CIGAR with
/// MD-derived reference bases.
pub fn extract_variations(
    record: &Record,
    region: &ReadRegion,
    second_mate: bool,
    variant_tag: &[u8; 2],
) -> Result<Vec<Variation>> {
    if let Ok(Aux::String(encoded)) = record.aux(variant_tag) {
        let delta = region
            .induced_offset(record.pos())
            .ok_or_else(|| outside_region(record))?;
        return Ok(Variation::parse_list(encoded)?
            .into_iter()
            .map(|v| v.shifted(delta).with_second_mate(second_mate))
            .collect());
    }
    let reference = match aligned_reference(record)? {
        Some(bases) => ReferenceBases::Aligned(bases),
        None => ReferenceBases::Unknown,
    };
    extract_with_reference(record, region, second_mate, &reference)
}

/// CIGAR walk with caller-provided reference evidence. The checker uses this
/// entry point with an explicit genomic sequence.
pub fn extract_with_reference(
    record: &Record,
    region: &ReadRegion,
    second_mate: bool,
    reference: &ReferenceBases<'_>,
) -> Result<Vec<Variation>> {
    let seq = record.seq().as_bytes();
    let reverse = record.is_reverse();
    let ref_base = |foot: usize, genomic: i64| -> Option<u8> {
        match reference {
            ReferenceBases::Unknown => None,
            ReferenceBases::Aligned(bases) => bases.get(foot).copied(),
            ReferenceBases::Genome { seq, offset } => {
                let idx = genomic - offset;
                if idx >= 0 {
                    seq.get(idx as usize).map(|b| b.to_ascii_uppercase())
                } else {
                    None
                }
            }
        }
    };

    let mut out = Vec::new();
    let mut read_pos = 0usize;
    let mut ref_pos = record.pos();
    let mut foot_off = 0usize;
    let mut seen_covered = false;
    for op in record.cigar().iter() {
        match *op {
            Cigar::Match(l) | Cigar::Equal(l) | Cigar::Diff(l) => {
                for i in 0..l as usize {
                    if let Some(genomic) = ref_base(foot_off + i, ref_pos + i as i64) {
                        let read = seq[read_pos + i].to_ascii_uppercase();
                        if genomic != read {
                            let pos = region
                                .induced_offset(ref_pos + i as i64)
                                .ok_or_else(|| outside_region(record))?;
                            let (genomic, read) = if reverse {
                                (dna::complement(genomic), dna::complement(read))
                            } else {
                                (genomic, read)
                            };
                            out.push(Variation::Mismatch {
                                pos,
                                genomic,
                                read,
                                second_mate,
                            });
                        }
                    }
                }
                read_pos += l as usize;
                ref_pos += l as i64;
                foot_off += l as usize;
                seen_covered = true;
            }
            Cigar::Ins(l) => {
                let pos = region
                    .induced_boundary(ref_pos)
                    .ok_or_else(|| outside_region(record))?;
                out.push(Variation::Insertion {
                    pos,
                    bases: oriented(&seq[read_pos..read_pos + l as usize], reverse),
                    second_mate,
                });
                read_pos += l as usize;
            }
            Cigar::Del(l) => {
                let pos = region
                    .induced_offset(ref_pos)
                    .ok_or_else(|| outside_region(record))?;
                let bases: Vec<u8> = (0..l as usize)
                    .map(|i| ref_base(foot_off + i, ref_pos + i as i64).unwrap_or(b'N'))
                    .collect();
                out.push(Variation::Deletion {
                    pos,
                    bases: oriented(&bases, reverse),
                    second_mate,
                });
                ref_pos += l as i64;
                foot_off += l as usize;
                seen_covered = true;
            }
            Cigar::RefSkip(l) => {
                ref_pos += l as i64;
            }
            Cigar::SoftClip(l) => {
                let leading = !seen_covered;
                out.push(Variation::Softclip {
                    five_prime: leading != reverse,
                    bases: oriented(&seq[read_pos..read_pos + l as usize], reverse),
                    second_mate,
                });
                read_pos += l as usize;
            }
            Cigar::HardClip(_) | Cigar::Pad(_) => {}
        }
    }
    Ok(out)
}

fn oriented(bases: &[u8], reverse: bool) -> Vec<u8> {
    if reverse {
        dna::revcomp(bases)
    } else {
        bases.iter().map(|b| b.to_ascii_uppercase()).collect()
    }
}

fn outside_region(record: &Record) -> RegataError {
    RegataError::Config(format!(
        "read {} produces variation evidence outside the target region",
        String::from_utf8_lossy(record.qname())
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Span;
    use rust_htslib::bam::record::CigarString;

    fn record(pos: i64, cigar: Vec<Cigar>, seq: &[u8]) -> Record {
        let mut rec = Record::new();
        let quals = vec![30u8; seq.len()];
        rec.set(b"1", Some(&CigarString(cigar)), seq, &quals);
        rec.set_pos(pos);
        rec.set_tid(0);
        rec.set_flags(0);
        rec
    }

    #[test]
    fn covered_length_counts_matches_and_deletions() {
        let cigar = CigarString(vec![
            Cigar::SoftClip(2),
            Cigar::Match(3),
            Cigar::Ins(1),
            Cigar::Match(2),
            Cigar::Del(1),
            Cigar::Match(2),
        ]);
        assert_eq!(covered_length(cigar.iter()), 8);
    }

    #[test]
    fn reference_reconstruction_from_md() {
        // read ACGTACGT against cigar 3M1I2M1D2M, MD 5^A2:
        // aligned reference is ACG (match) + AC (match) + A (deleted) + GT
        let rec = record(
            100,
            vec![
                Cigar::Match(3),
                Cigar::Ins(1),
                Cigar::Match(2),
                Cigar::Del(1),
                Cigar::Match(2),
            ],
            b"ACGTACGT",
        );
        let mut rec = rec;
        rec.push_aux(b"MD", Aux::String("5^A2")).unwrap();
        let reference = aligned_reference(&rec).unwrap().unwrap();
        assert_eq!(reference, b"ACGACAGT".to_vec());
    }

    #[test]
    fn manual_cigar_walk_round_trip() {
        // 3M1I2M1D2M with one mismatch inside the second match run
        let mut rec = record(
            100,
            vec![
                Cigar::Match(3),
                Cigar::Ins(1),
                Cigar::Match(2),
                Cigar::Del(1),
                Cigar::Match(2),
            ],
            b"ACGTACGT",
        );
        rec.push_aux(b"MD", Aux::String("3G1^A2")).unwrap();
        let region = ReadRegion::from_record(&rec).unwrap();
        let variations = extract_variations(&rec, &region, false, b"XV").unwrap();
        assert_eq!(
            variations,
            vec![
                Variation::Insertion {
                    pos: 3,
                    bases: b"T".to_vec(),
                    second_mate: false,
                },
                Variation::Mismatch {
                    pos: 3,
                    genomic: b'G',
                    read: b'A',
                    second_mate: false,
                },
                Variation::Deletion {
                    pos: 5,
                    bases: b"A".to_vec(),
                    second_mate: false,
                },
            ]
        );
    }

    #[test]
    fn explicit_tag_wins_and_is_reanchored() {
        let mut rec = record(110, vec![Cigar::Match(5)], b"AAAAA");
        rec.push_aux(b"XV", Aux::String("M1AG")).unwrap();
        // region spans 100-105 and 110-115; the record sits in the second part
        let region = ReadRegion::new(vec![Span::new(100, 105), Span::new(110, 115)]);
        let variations = extract_variations(&rec, &region, true, b"XV").unwrap();
        assert_eq!(
            variations,
            vec![Variation::Mismatch {
                pos: 6,
                genomic: b'A',
                read: b'G',
                second_mate: true,
            }]
        );
    }

    #[test]
    fn softclips_classify_by_strand() {
        let mut rec = record(
            100,
            vec![Cigar::SoftClip(2), Cigar::Match(4), Cigar::SoftClip(1)],
            b"TTACGTA",
        );
        rec.push_aux(b"MD", Aux::String("4")).unwrap();
        let region = ReadRegion::from_record(&rec).unwrap();
        let forward = extract_variations(&rec, &region, false, b"XV").unwrap();
        assert_eq!(
            forward,
            vec![
                Variation::Softclip {
                    five_prime: true,
                    bases: b"TT".to_vec(),
                    second_mate: false,
                },
                Variation::Softclip {
                    five_prime: false,
                    bases: b"A".to_vec(),
                    second_mate: false,
                },
            ]
        );

        rec.set_flags(16); // reverse strand
        let reversed = extract_variations(&rec, &region, false, b"XV").unwrap();
        assert_eq!(
            reversed,
            vec![
                Variation::Softclip {
                    five_prime: false,
                    bases: b"AA".to_vec(),
                    second_mate: false,
                },
                Variation::Softclip {
                    five_prime: true,
                    bases: b"T".to_vec(),
                    second_mate: false,
                },
            ]
        );
    }

    #[test]
    fn no_evidence_means_no_mismatch_calls() {
        let rec = record(100, vec![Cigar::Match(5)], b"ACGTA");
        let region = ReadRegion::from_record(&rec).unwrap();
        let variations = extract_variations(&rec, &region, false, b"XV").unwrap();
        assert!(variations.is_empty());
    }

    #[test]
    fn dedup_keys_fold_identical_evidence() {
        let mut a = record(100, vec![Cigar::Match(5)], b"ACGTA");
        let mut b = record(100, vec![Cigar::Match(5)], b"ACGTA");
        a.push_aux(b"MD", Aux::String("5")).unwrap();
        b.push_aux(b"MD", Aux::String("5")).unwrap();
        assert_eq!(dedup_key(&a, b"XV"), dedup_key(&b, b"XV"));
        let c = record(100, vec![Cigar::Match(5)], b"ACGTT");
        assert_ne!(dedup_key(&a, b"XV"), dedup_key(&c, b"XV"));
    }
}
