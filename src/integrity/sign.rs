//! The signing orchestrator: selects target objects, assembles canonical
//! messages, and stores the resulting envelopes as signature objects.

use crate::container::{Backing, ContainerFile};
use crate::descriptor::{DataType, Descriptor, HashType};
use crate::error::{Error, Result};
use crate::input::DescriptorInput;
use crate::integrity::clearsign;
use crate::integrity::dsse::{DsseEncoder, DsseSigner};
use crate::integrity::message::ImageMetadata;
use crate::mutate::AddOpts;
use crate::select::Selector;
use pgp::SignedSecretKey;
use std::io::Cursor;

enum Target {
    /// Sign every member of a group.
    Group(u32),
    /// Sign an explicit subset of a group's members.
    Subset(u32, Vec<u32>),
    /// Sign a single ungrouped object, linked by ID.
    Object(u32),
}

/// Signs groups or objects of a container, adding one signature object per
/// target.
///
/// Exactly one signing scheme must be configured: an OpenPGP entity for
/// clearsign envelopes, or a set of DSSE signers.
pub struct Signer<'a, B: Backing> {
    f: &'a mut ContainerFile<B>,
    entity: Option<SignedSecretKey>,
    dsse: Option<DsseEncoder>,
    hash: HashType,
    groups: Vec<u32>,
    objects: Vec<u32>,
    time: Option<i64>,
    deterministic: bool,
}

impl<'a, B: Backing> Signer<'a, B> {
    /// A signer over `f` with no key material and the default target set:
    /// every object group in the container.
    pub fn new(f: &'a mut ContainerFile<B>) -> Signer<'a, B> {
        Signer {
            f,
            entity: None,
            dsse: None,
            hash: HashType::Sha256,
            groups: Vec::new(),
            objects: Vec::new(),
            time: None,
            deterministic: false,
        }
    }

    /// Sign with an OpenPGP entity, producing clearsign envelopes.
    pub fn with_entity(mut self, key: SignedSecretKey) -> Signer<'a, B> {
        self.entity = Some(key);
        self
    }

    /// Sign with DSSE signers. Fails with [`Error::MultipleHashAlgorithms`]
    /// when the signers do not agree on a hash algorithm.
    pub fn with_signers(mut self, signers: Vec<Box<dyn DsseSigner>>) -> Result<Signer<'a, B>> {
        self.dsse = Some(DsseEncoder::new(signers)?);
        Ok(self)
    }

    /// Object digest algorithm for clearsign envelopes. DSSE envelopes take
    /// their hash from the signers instead.
    pub fn with_hash(mut self, hash: HashType) -> Signer<'a, B> {
        self.hash = hash;
        self
    }

    /// Add an object group to the target set. May be repeated.
    pub fn sign_group(mut self, group_id: u32) -> Signer<'a, B> {
        self.groups.push(group_id);
        self
    }

    /// Add specific objects to the target set. Objects sharing a group are
    /// covered by one signature over that subset.
    pub fn sign_objects<I: IntoIterator<Item = u32>>(mut self, ids: I) -> Signer<'a, B> {
        self.objects.extend(ids);
        self
    }

    /// Pin the signature objects' timestamps.
    pub fn with_time(mut self, time: i64) -> Signer<'a, B> {
        self.time = Some(time);
        self
    }

    /// Zero time and identity fields of the signature objects.
    pub fn deterministic(mut self) -> Signer<'a, B> {
        self.deterministic = true;
        self
    }

    fn targets(&self) -> Result<Vec<Target>> {
        let mut targets = Vec::new();
        for &g in &self.groups {
            targets.push(Target::Group(g));
        }
        // Explicit objects are grouped: one signature per group covers the
        // requested members, and ungrouped objects get per-object
        // signatures.
        let mut grouped: Vec<(u32, Vec<u32>)> = Vec::new();
        for &id in &self.objects {
            let d = self.f.descriptor(&Selector::any().with_id(id))?;
            match d.group_id() {
                Some(g) => match grouped.iter_mut().find(|(group, _)| *group == g) {
                    Some((_, ids)) => ids.push(id),
                    None => grouped.push((g, vec![id])),
                },
                None => targets.push(Target::Object(id)),
            }
        }
        for (g, ids) in grouped {
            targets.push(Target::Subset(g, ids));
        }
        if targets.is_empty() {
            for g in self.f.group_ids() {
                targets.push(Target::Group(g));
            }
            if targets.is_empty() {
                return Err(Error::NoGroupsFound);
            }
        }
        Ok(targets)
    }

    fn target_objects(&self, target: &Target) -> Result<Vec<Descriptor>> {
        let objects = match *target {
            Target::Group(g) | Target::Subset(g, _) => {
                let members = self.f.descriptors(&Selector::any().with_group_id(g))?;
                if members.is_empty() {
                    return Err(Error::InvalidGroupId(g));
                }
                match *target {
                    Target::Subset(_, ref ids) => members
                        .into_iter()
                        .filter(|d| ids.contains(&d.id()))
                        .collect(),
                    _ => members,
                }
            }
            Target::Object(id) => vec![self.f.descriptor(&Selector::any().with_id(id))?],
        };
        if objects.is_empty() {
            return Err(Error::NoObjects);
        }
        Ok(objects)
    }

    /// Sign every target, storing one signature object per target.
    pub fn sign(self) -> Result<()> {
        if self.entity.is_none() && self.dsse.is_none() {
            return Err(Error::NoKeyMaterial);
        }
        let hash = match self.dsse {
            Some(ref encoder) => encoder.hash_type(),
            None => self.hash,
        };
        let targets = self.targets()?;

        for target in targets {
            let objects = self.target_objects(&target)?;
            let metadata = ImageMetadata::new(self.f, &objects, hash)?;
            let json = serde_json::to_vec(&metadata)?;

            let (envelope, entity) = match self.dsse {
                Some(ref encoder) => (encoder.encode(&json)?, encoder.key_id().to_vec()),
                None => {
                    let key = self.entity.as_ref().expect("scheme was checked above");
                    let text = String::from_utf8(json).expect("serde_json output is UTF-8");
                    (clearsign::sign(&text, key)?, clearsign::fingerprint(key))
                }
            };

            let mut input = DescriptorInput::new(DataType::Signature, Cursor::new(envelope))
                .with_no_group()
                .with_signature_metadata(hash, &entity)?;
            input = match target {
                Target::Group(g) | Target::Subset(g, _) => input.with_group_link(g),
                Target::Object(id) => input.with_link(id),
            };
            let mut opts = AddOpts::default();
            if let Some(t) = self.time {
                opts = opts.with_time(t);
            }
            if self.deterministic {
                opts = opts.deterministic();
            }
            self.f.add_object(input, opts)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::CreateOpts;
    use crate::integrity::clearsign::tests::test_key;
    use crate::integrity::dsse::tests::ed25519_pair;
    use uuid::Uuid;

    const TIME: i64 = 946702800;

    fn test_container() -> ContainerFile<Vec<u8>> {
        let opts = CreateOpts::default()
            .deterministic()
            .with_id(Uuid::parse_str("de170c43-36ab-44a8-bca9-1ea1a070a274").unwrap())
            .with_time(TIME)
            .with_descriptors(vec![
                DescriptorInput::new(DataType::Generic, &b"abc"[..]),
                DescriptorInput::new(DataType::Generic, &b"def"[..]).with_group(2),
                DescriptorInput::new(DataType::Generic, &b"xyz"[..]).with_no_group(),
            ]);
        ContainerFile::create(Vec::new(), opts).unwrap()
    }

    #[test]
    fn no_key_material_rejected() {
        let mut f = test_container();
        match Signer::new(&mut f).sign() {
            Err(Error::NoKeyMaterial) => {}
            other => panic!("expected NoKeyMaterial, got {:?}", other),
        }
    }

    #[test]
    fn default_targets_are_all_groups() {
        let (secret, _) = test_key();
        let mut f = test_container();
        Signer::new(&mut f)
            .with_entity(secret)
            .with_time(TIME)
            .sign()
            .unwrap();
        let sigs = f
            .descriptors(&Selector::any().with_data_type(DataType::Signature))
            .unwrap();
        assert_eq!(sigs.len(), 2, "one signature per group");
        assert_eq!(sigs[0].linked_id(), Some((1, true)));
        assert_eq!(sigs[1].linked_id(), Some((2, true)));
        assert_eq!(sigs[0].group_id(), None, "signature objects are ungrouped");
        let (hash, _) = sigs[0].signature_metadata().unwrap();
        assert_eq!(hash, HashType::Sha256);
    }

    #[test]
    fn object_target_links_by_id() {
        let (secret, _) = test_key();
        let mut f = test_container();
        Signer::new(&mut f)
            .with_entity(secret)
            .sign_objects([3])
            .with_time(TIME)
            .sign()
            .unwrap();
        let sigs = f
            .descriptors(&Selector::any().with_data_type(DataType::Signature))
            .unwrap();
        assert_eq!(sigs.len(), 1);
        assert_eq!(
            sigs[0].linked_id(),
            Some((3, false)),
            "ungrouped objects get an object link"
        );
    }

    #[test]
    fn dsse_signature_records_key_id() {
        let (signer, _) = ed25519_pair();
        let key_id = signer.key_id();
        let mut f = test_container();
        Signer::new(&mut f)
            .with_signers(vec![Box::new(signer)])
            .unwrap()
            .sign_group(1)
            .with_time(TIME)
            .sign()
            .unwrap();
        let sig = f
            .descriptor(&Selector::any().with_data_type(DataType::Signature))
            .unwrap();
        let (_, entity) = sig.signature_metadata().unwrap();
        assert_eq!(entity, key_id, "descriptor entity is the DSSE key ID");
    }

    #[test]
    fn empty_container_has_no_groups() {
        let (secret, _) = test_key();
        let mut f = ContainerFile::create(
            Vec::new(),
            CreateOpts::default().deterministic().with_time(TIME),
        )
        .unwrap();
        match Signer::new(&mut f).with_entity(secret).sign() {
            Err(Error::NoGroupsFound) => {}
            other => panic!("expected NoGroupsFound, got {:?}", other),
        }
    }
}
