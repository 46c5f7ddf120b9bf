//! Mission plans: a tree of tasks, each holding messages to run.
//!
//! On the wire a task is written as:
//!
//! ```text
//! id u16 | child count u16 | child offset u32 * count |
//! message count u16 | (message id u16, embedded message, blocking u8) * count |
//! child tasks...
//! ```
//!
//! Child offsets are absolute positions in the buffer, back-patched once
//! each child has been written. Embedded messages are complete encoded
//! messages (header and body) behind a u32 length; an absent message is
//! written as zero length.

use std::collections::{BTreeMap, HashSet};

use jaus_core::codec::{CodecError, Packet};
use jaus_core::message::{encode, Message};
use jaus_core::wire::{Header, Version};

use crate::catalog::MessageCatalog;

/// Deepest task nesting accepted when reading.
pub const MAX_TREE_DEPTH: usize = 64;

#[derive(Debug, Clone)]
pub struct TaskMessage {
    /// `None` when the message's code was unknown to the catalog that read it.
    pub message: Option<Box<dyn Message>>,
    /// The task waits for this message to finish before the next one.
    pub blocking: bool,
}

/// A node of the mission tree.
///
/// Parent, root and sibling IDs are derived from the tree shape and kept
/// current by every structural change made through this type.
#[derive(Debug, Clone)]
pub struct Task {
    id: u16,
    children: Vec<Task>,
    messages: BTreeMap<u16, TaskMessage>,
    parent_id: Option<u16>,
    root_id: u16,
    previous_sibling_id: Option<u16>,
    next_sibling_id: Option<u16>,
}

impl Task {
    pub fn new(id: u16) -> Self {
        Self {
            id,
            children: Vec::new(),
            messages: BTreeMap::new(),
            parent_id: None,
            root_id: id,
            previous_sibling_id: None,
            next_sibling_id: None,
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn children(&self) -> &[Task] {
        &self.children
    }

    pub fn messages(&self) -> &BTreeMap<u16, TaskMessage> {
        &self.messages
    }

    pub fn parent_id(&self) -> Option<u16> {
        self.parent_id
    }

    pub fn root_id(&self) -> u16 {
        self.root_id
    }

    pub fn previous_sibling_id(&self) -> Option<u16> {
        self.previous_sibling_id
    }

    pub fn next_sibling_id(&self) -> Option<u16> {
        self.next_sibling_id
    }

    /// Add or replace the message stored under `message_id`.
    pub fn set_message(
        &mut self,
        message_id: u16,
        message: Box<dyn Message>,
        blocking: bool,
    ) -> Option<TaskMessage> {
        self.messages.insert(
            message_id,
            TaskMessage {
                message: Some(message),
                blocking,
            },
        )
    }

    pub fn remove_message(&mut self, message_id: u16) -> Option<TaskMessage> {
        self.messages.remove(&message_id)
    }

    /// IDs of this task and every descendant, depth first.
    pub fn task_ids(&self) -> Vec<u16> {
        let mut ids = vec![self.id];
        for child in &self.children {
            ids.extend(child.task_ids());
        }
        ids
    }

    pub fn find(&self, id: u16) -> Option<&Task> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    pub fn find_mut(&mut self, id: u16) -> Option<&mut Task> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter_mut().find_map(|child| child.find_mut(id))
    }

    /// The task whose direct child is `id`.
    pub fn parent_of(&self, id: u16) -> Option<&Task> {
        if self.children.iter().any(|child| child.id == id) {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.parent_of(id))
    }

    /// Append `child` (with its subtree) as the last child of this task.
    ///
    /// Fails if any task ID in `child` already appears under this task.
    pub fn add_child(&mut self, child: Task) -> Result<(), CodecError> {
        let existing: HashSet<u16> = self.task_ids().into_iter().collect();
        check_unique(&existing, &child)?;
        self.children.push(child);
        self.link_children();
        Ok(())
    }

    /// Detach the descendant `id` with its subtree. A task cannot remove itself.
    pub fn remove_task(&mut self, id: u16) -> Option<Task> {
        if let Some(index) = self.children.iter().position(|child| child.id == id) {
            let mut removed = self.children.remove(index);
            self.link_children();
            removed.relink();
            return Some(removed);
        }
        self.children
            .iter_mut()
            .find_map(|child| child.remove_task(id))
    }

    /// Treat this task as a root and recompute every derived link below it.
    pub fn relink(&mut self) {
        self.parent_id = None;
        self.root_id = self.id;
        self.previous_sibling_id = None;
        self.next_sibling_id = None;
        self.link_children();
    }

    fn link_children(&mut self) {
        let ids: Vec<u16> = self.children.iter().map(|child| child.id).collect();
        for (index, child) in self.children.iter_mut().enumerate() {
            child.parent_id = Some(self.id);
            child.root_id = self.root_id;
            child.previous_sibling_id = index.checked_sub(1).map(|prev| ids[prev]);
            child.next_sibling_id = ids.get(index + 1).copied();
            child.link_children();
        }
    }

    // ── Serialization ────────────────────────────────────────────────────────

    /// Append this task and its subtree. Returns bytes written.
    pub fn write(&self, packet: &mut Packet, version: Version) -> Result<usize, CodecError> {
        let start = packet.len();
        let result = self.write_node(packet, version);
        if result.is_err() {
            packet.truncate(start);
        }
        result.map(|()| packet.len() - start)
    }

    fn write_node(&self, packet: &mut Packet, version: Version) -> Result<(), CodecError> {
        let child_count = u16::try_from(self.children.len()).map_err(|_| {
            CodecError::InvalidValue(format!(
                "task {} has {} children",
                self.id,
                self.children.len()
            ))
        })?;
        let message_count = u16::try_from(self.messages.len()).map_err(|_| {
            CodecError::InvalidValue(format!(
                "task {} has {} messages",
                self.id,
                self.messages.len()
            ))
        })?;

        packet.write_u16(self.id);
        packet.write_u16(child_count);
        let table = packet.len();
        for _ in &self.children {
            packet.write_u32(0);
        }

        packet.write_u16(message_count);
        let header = Header {
            version,
            ..Header::default()
        };
        for (message_id, entry) in &self.messages {
            packet.write_u16(*message_id);
            match &entry.message {
                Some(message) => {
                    let encoded = encode(message.as_ref(), &header)?;
                    packet.write_embedded(encoded.as_slice())?;
                }
                None => {
                    packet.write_embedded(&[])?;
                }
            }
            packet.write_u8(entry.blocking as u8);
        }

        for (index, child) in self.children.iter().enumerate() {
            let offset = u32::try_from(packet.len()).map_err(|_| {
                CodecError::InvalidValue(format!("task {} offset past u32", child.id))
            })?;
            packet.write_u32_at(table + index * 4, offset)?;
            child.write_node(packet, version)?;
        }
        Ok(())
    }

    /// Read the task written at absolute position `pos`, with its subtree.
    ///
    /// Messages decode through `catalog`; unknown codes come back as absent
    /// messages. The returned task is linked as a root and the cursor is left
    /// after the last byte of the tree. On error the cursor is restored.
    pub fn read(
        packet: &mut Packet,
        pos: usize,
        catalog: &MessageCatalog,
    ) -> Result<Task, CodecError> {
        let start = packet.read_pos();
        let mut seen = HashSet::new();
        match read_node(packet, pos, catalog, 0, &mut seen) {
            Ok((mut task, end)) => {
                packet.set_read_pos(end)?;
                task.relink();
                tracing::trace!(root = task.id, tasks = seen.len(), "task tree read");
                Ok(task)
            }
            Err(e) => {
                packet.set_read_pos(start)?;
                Err(e)
            }
        }
    }
}

fn check_unique(existing: &HashSet<u16>, subtree: &Task) -> Result<(), CodecError> {
    let mut seen = existing.clone();
    for id in subtree.task_ids() {
        if !seen.insert(id) {
            return Err(CodecError::InvalidValue(format!("duplicate task id {id}")));
        }
    }
    Ok(())
}

/// Returns the task and the position just past its subtree.
fn read_node(
    packet: &mut Packet,
    pos: usize,
    catalog: &MessageCatalog,
    depth: usize,
    seen: &mut HashSet<u16>,
) -> Result<(Task, usize), CodecError> {
    if depth >= MAX_TREE_DEPTH {
        return Err(CodecError::InvalidValue(format!(
            "task tree deeper than {MAX_TREE_DEPTH}"
        )));
    }
    packet.set_read_pos(pos)?;

    let mut task = Task::new(packet.read_u16()?);
    if !seen.insert(task.id) {
        return Err(CodecError::InvalidValue(format!("duplicate task id {}", task.id)));
    }
    let child_count = packet.read_u16()? as usize;
    let offsets = (0..child_count)
        .map(|_| packet.read_u32().map(|offset| offset as usize))
        .collect::<Result<Vec<usize>, CodecError>>()?;

    let message_count = packet.read_u16()?;
    for _ in 0..message_count {
        let message_id = packet.read_u16()?;
        let embedded = packet.read_embedded()?;
        let blocking = packet.read_u8()? != 0;
        let message = if embedded.is_empty() {
            None
        } else {
            let mut inner = Packet::from(embedded);
            let decoded = catalog.decode(&mut inner)?;
            if decoded.is_none() {
                tracing::debug!(
                    task = task.id,
                    message_id,
                    code = Header::peek_command_code(inner.as_slice()),
                    "task message has unknown code"
                );
            }
            decoded.map(|(_, message)| message)
        };
        if task
            .messages
            .insert(message_id, TaskMessage { message, blocking })
            .is_some()
        {
            return Err(CodecError::InvalidValue(format!(
                "task {} repeats message id {message_id}",
                task.id
            )));
        }
    }

    let mut end = packet.read_pos();
    let record_end = end;
    for offset in offsets {
        if offset < record_end {
            return Err(CodecError::InvalidValue(format!(
                "task {} child offset {offset} points back before {record_end}",
                task.id
            )));
        }
        let (child, child_end) = read_node(packet, offset, catalog, depth + 1, seen)?;
        task.children.push(child);
        end = end.max(child_end);
    }
    Ok((task, end))
}

/// A mission plan: an ID and the root of its task tree.
#[derive(Debug, Clone)]
pub struct Mission {
    id: u16,
    root: Task,
}

impl Mission {
    pub fn new(id: u16, mut root: Task) -> Self {
        root.relink();
        Self { id, root }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn root(&self) -> &Task {
        &self.root
    }

    pub fn task_ids(&self) -> Vec<u16> {
        self.root.task_ids()
    }

    pub fn find(&self, id: u16) -> Option<&Task> {
        self.root.find(id)
    }

    /// Mutable access to one task's messages. Structural changes go through
    /// [`Mission::add_task`] and [`Mission::remove_task`].
    pub fn find_mut(&mut self, id: u16) -> Option<&mut Task> {
        self.root.find_mut(id)
    }

    pub fn parent_of(&self, id: u16) -> Option<&Task> {
        self.root.parent_of(id)
    }

    /// Attach `task` under `parent_id`. Task IDs must stay unique across
    /// the whole mission.
    pub fn add_task(&mut self, parent_id: u16, task: Task) -> Result<(), CodecError> {
        let existing: HashSet<u16> = self.task_ids().into_iter().collect();
        check_unique(&existing, &task)?;
        let parent = self
            .root
            .find_mut(parent_id)
            .ok_or_else(|| CodecError::InvalidValue(format!("no task {parent_id}")))?;
        parent.children.push(task);
        self.root.relink();
        Ok(())
    }

    pub fn remove_task(&mut self, id: u16) -> Option<Task> {
        let removed = self.root.remove_task(id);
        self.root.relink();
        removed
    }

    pub fn relink(&mut self) {
        self.root.relink();
    }

    pub fn write(&self, packet: &mut Packet, version: Version) -> Result<usize, CodecError> {
        let start = packet.len();
        packet.write_u16(self.id);
        match self.root.write(packet, version) {
            Ok(written) => Ok(2 + written),
            Err(e) => {
                packet.truncate(start);
                Err(e)
            }
        }
    }

    /// Read a mission from the packet cursor.
    pub fn read(packet: &mut Packet, catalog: &MessageCatalog) -> Result<Mission, CodecError> {
        let start = packet.read_pos();
        let id = packet.read_u16()?;
        let pos = packet.read_pos();
        match Task::read(packet, pos, catalog) {
            Ok(root) => Ok(Mission { id, root }),
            Err(e) => {
                packet.set_read_pos(start)?;
                Err(e)
            }
        }
    }
}
