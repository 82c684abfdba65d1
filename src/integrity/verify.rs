//! The verification orchestrator.
//!
//! Caller options build a plan of verify tasks: modern group or object
//! verification over the canonical message, or the two legacy schemes. Each
//! task locates its signature objects by link, probes whether each envelope
//! is DSSE or clearsign, verifies it against the configured key material,
//! and cross-checks the covered object set against what the caller asked
//! for. Results are delivered per signature to an optional callback, which
//! may suppress a failure by returning true.

use crate::container::{Backing, ContainerFile};
use crate::descriptor::{DataType, Descriptor};
use crate::error::{Error, Result};
use crate::integrity::clearsign;
use crate::integrity::dsse::{self, DsseDecoder, DsseVerifier};
use crate::integrity::legacy;
use crate::integrity::message::ImageMetadata;
use crate::select::Selector;
use pgp::SignedPublicKey;

/// The outcome of verifying one signature object.
pub struct VerifyResult {
    /// The signature descriptor this result concerns.
    pub signature: Descriptor,
    /// Descriptors whose digests were verified by this signature.
    pub verified: Vec<Descriptor>,
    /// Fingerprints or key IDs that produced valid signatures.
    pub keys: Vec<Vec<u8>>,
    /// The failure, if verification did not succeed.
    pub error: Option<Error>,
}

enum Task {
    /// Verify a group against signatures linked to it. `subset` switches the
    /// coverage check from exact equality to superset.
    Group {
        group_id: u32,
        subset: Option<Vec<u32>>,
    },
    /// Verify an ungrouped object against signatures linked to it by ID.
    Object { id: u32 },
    /// Legacy scheme: signature over the concatenated payloads of a group.
    LegacyGroup { group_id: u32 },
    /// Legacy scheme: signature over one object's payload.
    LegacyObject { id: u32 },
}

impl Task {
    fn subset_ok(&self) -> bool {
        matches!(
            self,
            Task::Group { subset: Some(_), .. } | Task::Object { .. }
        )
    }
}

/// Verifies signatures over groups and objects of a container.
pub struct Verifier<'a, B: Backing> {
    f: &'a ContainerFile<B>,
    keyring: Vec<SignedPublicKey>,
    decoder: Option<DsseDecoder>,
    groups: Vec<u32>,
    objects: Vec<u32>,
    legacy: bool,
    legacy_all: bool,
    #[allow(clippy::type_complexity)]
    callback: Option<Box<dyn FnMut(&VerifyResult) -> bool + 'a>>,
}

impl<'a, B: Backing> Verifier<'a, B> {
    /// A verifier over `f` with no key material and the default target set:
    /// every object group in the container.
    pub fn new(f: &'a ContainerFile<B>) -> Verifier<'a, B> {
        Verifier {
            f,
            keyring: Vec::new(),
            decoder: None,
            groups: Vec::new(),
            objects: Vec::new(),
            legacy: false,
            legacy_all: false,
            callback: None,
        }
    }

    /// OpenPGP public keys to verify clearsign envelopes against.
    pub fn with_keyring(mut self, keys: Vec<SignedPublicKey>) -> Verifier<'a, B> {
        self.keyring = keys;
        self
    }

    /// DSSE verifiers to verify envelope signatures against.
    pub fn with_verifiers(mut self, verifiers: Vec<Box<dyn DsseVerifier>>) -> Verifier<'a, B> {
        self.decoder = Some(DsseDecoder::new(verifiers));
        self
    }

    /// Require at least `threshold` valid DSSE signatures per envelope.
    pub fn with_dsse_threshold(mut self, threshold: usize) -> Verifier<'a, B> {
        self.decoder = self.decoder.map(|d| d.with_threshold(threshold));
        self
    }

    /// Add an object group to the target set. May be repeated.
    pub fn verify_group(mut self, group_id: u32) -> Verifier<'a, B> {
        self.groups.push(group_id);
        self
    }

    /// Add one object to the target set. Grouped objects are checked as a
    /// subset of their group's signatures.
    pub fn verify_object(mut self, id: u32) -> Verifier<'a, B> {
        self.objects.push(id);
        self
    }

    /// Verify legacy group signatures instead of the modern scheme.
    pub fn legacy(mut self) -> Verifier<'a, B> {
        self.legacy = true;
        self
    }

    /// Verify legacy per-object signatures for every object.
    pub fn legacy_all(mut self) -> Verifier<'a, B> {
        self.legacy = true;
        self.legacy_all = true;
        self
    }

    /// Receive a [`VerifyResult`] per signature; returning true suppresses
    /// that signature's failure.
    pub fn with_callback<F>(mut self, callback: F) -> Verifier<'a, B>
    where
        F: FnMut(&VerifyResult) -> bool + 'a,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    fn tasks(&self) -> Result<Vec<Task>> {
        let mut tasks = Vec::new();
        for &g in &self.groups {
            tasks.push(if self.legacy {
                Task::LegacyGroup { group_id: g }
            } else {
                Task::Group {
                    group_id: g,
                    subset: None,
                }
            });
        }

        let mut grouped: Vec<(u32, Vec<u32>)> = Vec::new();
        for &id in &self.objects {
            if self.legacy {
                tasks.push(Task::LegacyObject { id });
                continue;
            }
            let d = self.f.descriptor(&Selector::any().with_id(id))?;
            match d.group_id() {
                Some(g) => match grouped.iter_mut().find(|(group, _)| *group == g) {
                    Some((_, ids)) => ids.push(id),
                    None => grouped.push((g, vec![id])),
                },
                None => tasks.push(Task::Object { id }),
            }
        }
        for (group_id, ids) in grouped {
            tasks.push(Task::Group {
                group_id,
                subset: Some(ids),
            });
        }

        if tasks.is_empty() {
            if self.legacy_all {
                for d in self.f.descriptors(&Selector::any())? {
                    if d.data_type() != DataType::Signature {
                        tasks.push(Task::LegacyObject { id: d.id() });
                    }
                }
                if tasks.is_empty() {
                    return Err(Error::NoObjects);
                }
            } else {
                let groups = self.f.group_ids();
                if groups.is_empty() {
                    return Err(Error::NoGroupsFound);
                }
                for group_id in groups {
                    tasks.push(if self.legacy {
                        Task::LegacyGroup { group_id }
                    } else {
                        Task::Group {
                            group_id,
                            subset: None,
                        }
                    });
                }
            }
        }
        Ok(tasks)
    }

    fn task_signatures(&self, task: &Task) -> Result<Vec<Descriptor>> {
        let (selector, id, is_group) = match *task {
            Task::Group { group_id, .. } | Task::LegacyGroup { group_id } => (
                Selector::any()
                    .with_data_type(DataType::Signature)
                    .with_linked_group_id(group_id),
                group_id,
                true,
            ),
            Task::Object { id } | Task::LegacyObject { id } => (
                Selector::any()
                    .with_data_type(DataType::Signature)
                    .with_linked_id(id),
                id,
                false,
            ),
        };
        let sigs = self.f.descriptors(&selector)?;
        if sigs.is_empty() {
            return Err(Error::SignatureNotFound { id, is_group });
        }
        Ok(sigs)
    }

    /// Union of signing entities over all tasks, read from the signature
    /// descriptors. Fails if any task has no signatures to enumerate.
    pub fn any_signed_by(&self) -> Result<Vec<Vec<u8>>> {
        let mut out: Vec<Vec<u8>> = Vec::new();
        for task in self.tasks()? {
            for fp in self.task_fingerprints(&task)? {
                if !out.contains(&fp) {
                    out.push(fp);
                }
            }
        }
        out.sort();
        Ok(out)
    }

    /// Intersection of signing entities: only entities that signed every
    /// task.
    pub fn all_signed_by(&self) -> Result<Vec<Vec<u8>>> {
        let mut common: Option<Vec<Vec<u8>>> = None;
        for task in self.tasks()? {
            let fps = self.task_fingerprints(&task)?;
            common = Some(match common {
                None => fps,
                Some(prev) => prev.into_iter().filter(|fp| fps.contains(fp)).collect(),
            });
        }
        let mut out = common.unwrap_or_default();
        out.sort();
        Ok(out)
    }

    fn task_fingerprints(&self, task: &Task) -> Result<Vec<Vec<u8>>> {
        self.task_signatures(task)?
            .iter()
            .map(|sig| {
                let (_, entity) = sig.signature_metadata()?;
                // OpenPGP v4 fingerprints are 20 bytes, DSSE key IDs 32;
                // probe the envelope to know how much of the field is live.
                let data = self.f.data(sig)?;
                let n = if dsse::is_envelope(&data) { 32 } else { 20 };
                Ok(entity[..n].to_vec())
            })
            .collect()
    }

    /// Run every task. Per-signature failures go to the callback first; an
    /// unsuppressed failure aborts with that error.
    pub fn verify(&mut self) -> Result<()> {
        if self.keyring.is_empty() && self.decoder.is_none() && self.callback.is_none() {
            return Err(Error::NoKeyMaterial);
        }
        for task in self.tasks()? {
            for sig in self.task_signatures(&task)? {
                let mut result = match self.verify_signature(&task, &sig) {
                    Ok((verified, keys)) => VerifyResult {
                        signature: sig,
                        verified,
                        keys,
                        error: None,
                    },
                    Err(e) => VerifyResult {
                        signature: sig,
                        verified: Vec::new(),
                        keys: Vec::new(),
                        error: Some(e),
                    },
                };
                let suppress = match self.callback {
                    Some(ref mut callback) => callback(&result),
                    None => false,
                };
                if let Some(err) = result.error.take() {
                    if !suppress {
                        return Err(err);
                    }
                }
            }
        }
        Ok(())
    }

    fn verify_signature(
        &self,
        task: &Task,
        sig: &Descriptor,
    ) -> Result<(Vec<Descriptor>, Vec<Vec<u8>>), Error> {
        self.verify_signature_inner(task, sig)
            .map_err(|e| match e {
                e @ Error::SignatureNotValid { .. } => e,
                e => Error::SignatureNotValid {
                    id: sig.id(),
                    source: Box::new(e),
                },
            })
    }

    fn verify_signature_inner(
        &self,
        task: &Task,
        sig: &Descriptor,
    ) -> Result<(Vec<Descriptor>, Vec<Vec<u8>>)> {
        let data = self.f.data(sig)?;
        match *task {
            Task::Group { group_id, ref subset } => {
                let members = self.group_members(group_id)?;
                let requested = match subset {
                    Some(ids) => ids.clone(),
                    None => members.iter().map(|d| d.id()).collect(),
                };
                self.verify_modern(task, &data, &requested)
            }
            Task::Object { id } => self.verify_modern(task, &data, &[id]),
            Task::LegacyGroup { group_id } => {
                let members = self.group_members(group_id)?;
                let expected = legacy::signed_text(self.f, &members)?;
                let fp = legacy::verify(&data, &expected, &self.keyring)?;
                Ok((members, vec![fp]))
            }
            Task::LegacyObject { id } => {
                let d = self.f.descriptor(&Selector::any().with_id(id))?;
                let expected = legacy::signed_text(self.f, std::slice::from_ref(&d))?;
                let fp = legacy::verify(&data, &expected, &self.keyring)?;
                Ok((vec![d], vec![fp]))
            }
        }
    }

    fn verify_modern(
        &self,
        task: &Task,
        data: &[u8],
        requested: &[u32],
    ) -> Result<(Vec<Descriptor>, Vec<Vec<u8>>)> {
        let (metadata, keys): (ImageMetadata, Vec<Vec<u8>>) = if dsse::is_envelope(data) {
            let decoder = self.decoder.as_ref().ok_or(Error::NoKeyMaterial)?;
            let (payload, key_ids) = decoder.decode(data)?;
            (
                serde_json::from_slice(&payload)?,
                key_ids.iter().map(|k| k.to_vec()).collect(),
            )
        } else if clearsign::is_clearsign(data) {
            let (text, fp) = clearsign::verify(data, &self.keyring)?;
            (serde_json::from_str(&text)?, vec![fp])
        } else {
            return Err(Error::Format("unrecognized signature envelope".into()));
        };

        let covered = metadata.object_ids();
        if requested.iter().any(|id| !covered.contains(id)) {
            return Err(Error::CoverageMismatch);
        }
        if !task.subset_ok() && covered.iter().any(|id| !requested.contains(id)) {
            return Err(Error::CoverageMismatch);
        }
        let verified = metadata.verify(self.f)?;
        Ok((verified, keys))
    }

    fn group_members(&self, group_id: u32) -> Result<Vec<Descriptor>> {
        let members = self
            .f
            .descriptors(&Selector::any().with_group_id(group_id))?;
        if members.is_empty() {
            return Err(Error::InvalidGroupId(group_id));
        }
        Ok(members)
    }
}
