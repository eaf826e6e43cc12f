//! Shared world store
//!
//! The world region is a fixed [`WorldHeader`] followed by `width * height`
//! row-major `i32` cells. The cell count is not stored implicitly behind the
//! header: a [`WorldLayout`] computed once from the board size is passed to
//! every create/attach call and bounds every slice handed out.
//!
//! Access always goes through a section of the [`RwGate`](crate::RwGate):
//! [`SharedWorld::read`] needs a [`ReadSection`], [`SharedWorld::write`]
//! needs an exclusive [`WriteSection`] and a read-write mapping.

use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::gate::{ReadSection, WriteSection};
use crate::region::{Access, SharedRegion};
use crate::{MAX_AGENTS, NAME_LEN, OUT_OF_BOUNDS, direction, is_reward};

/// One roster slot
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AgentRecord {
    /// NUL-padded display name
    pub name: [u8; NAME_LEN],
    pub score: u32,
    pub invalid_moves: u32,
    pub valid_moves: u32,
    pub x: u16,
    pub y: u16,
    /// Owning process id
    pub pid: i32,
    blocked: u8,
    _pad: [u8; 3],
}

impl AgentRecord {
    /// Fresh record at (x, y) with the name truncated to fit
    pub fn new(name: &str, x: u16, y: u16) -> Self {
        let mut record = Self {
            x,
            y,
            ..Default::default()
        };
        record.set_name(name);
        record
    }

    /// Store `name`, truncated on a char boundary to leave a trailing NUL
    pub fn set_name(&mut self, name: &str) {
        let mut end = name.len().min(NAME_LEN - 1);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        self.name = [0; NAME_LEN];
        self.name[..end].copy_from_slice(&name.as_bytes()[..end]);
    }

    pub fn name(&self) -> String {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked != 0
    }

    /// Mark the agent blocked; there is no way back
    pub fn mark_blocked(&mut self) {
        self.blocked = 1;
    }

    pub fn position(&self) -> (i32, i32) {
        (self.x as i32, self.y as i32)
    }
}

/// Fixed part of the world region
#[repr(C)]
#[derive(Debug)]
pub struct WorldHeader {
    pub width: u16,
    pub height: u16,
    pub agent_count: u32,
    pub agents: [AgentRecord; MAX_AGENTS],
    finished: u8,
    _pad: [u8; 3],
}

/// Board dimensions and the region size they imply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorldLayout {
    width: u16,
    height: u16,
}

impl WorldLayout {
    /// Byte offset of the first cell
    pub const CELLS_OFFSET: usize = {
        let header = std::mem::size_of::<WorldHeader>();
        let align = std::mem::align_of::<i32>();
        header.div_ceil(align) * align
    };

    pub fn new(width: u16, height: u16) -> StoreResult<Self> {
        if width == 0 || height == 0 {
            return Err(StoreError::InvalidLayout(format!("empty board {}x{}", width, height)));
        }
        Ok(Self { width, height })
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    /// Number of cells
    pub fn cells(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Total region size in bytes
    pub fn len(&self) -> usize {
        Self::CELLS_OFFSET + self.cells() * std::mem::size_of::<i32>()
    }

    pub fn is_empty(&self) -> bool {
        self.cells() == 0
    }
}

/// Read access shared by every view of a board
pub trait Board {
    fn width(&self) -> u16;
    fn height(&self) -> u16;
    /// Row-major cells, exactly `width * height` long
    fn cells(&self) -> &[i32];

    fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && x < self.width() as i32 && y < self.height() as i32
    }

    /// Cell value, or [`OUT_OF_BOUNDS`] outside the board
    fn cell(&self, x: i32, y: i32) -> i32 {
        if !self.in_bounds(x, y) {
            return OUT_OF_BOUNDS;
        }
        self.cells()[y as usize * self.width() as usize + x as usize]
    }

    /// In bounds and holding a reward
    fn is_free(&self, x: i32, y: i32) -> bool {
        self.in_bounds(x, y) && is_reward(self.cell(x, y))
    }

    /// Whether any of the 8 neighbours of (x, y) is free
    fn has_free_neighbor(&self, x: i32, y: i32) -> bool {
        direction::DIRECTIONS.iter().any(|d| {
            let (dx, dy) = d.offset();
            self.is_free(x + dx, y + dy)
        })
    }
}

/// Handle on a mapped world region
#[derive(Debug)]
pub struct SharedWorld {
    region: SharedRegion,
    layout: WorldLayout,
}

impl SharedWorld {
    /// Create and initialise the named region (master only)
    ///
    /// All cells start at 0 and every record is empty; the caller seeds the
    /// board inside a write section.
    pub fn create(name: &str, layout: WorldLayout, agent_count: usize) -> StoreResult<Self> {
        debug!(name, ?layout, agent_count, "SharedWorld::create: called");
        check_agent_count(agent_count)?;
        let region = SharedRegion::create(name, layout.len())?;
        let world = Self { region, layout };
        world.init_header(agent_count);
        Ok(world)
    }

    /// Map an existing region; width and height must match the creator's
    pub fn attach(name: &str, layout: WorldLayout, access: Access) -> StoreResult<Self> {
        debug!(name, ?layout, ?access, "SharedWorld::attach: called");
        let region = SharedRegion::open(name, layout.len(), access)?;
        let world = Self { region, layout };
        // width/height never change after creation, so no section is needed
        let header = world.header();
        if header.width != layout.width || header.height != layout.height {
            return Err(StoreError::InvalidLayout(format!(
                "{} holds a {}x{} board, expected {}x{}",
                name, header.width, header.height, layout.width, layout.height
            )));
        }
        Ok(world)
    }

    /// In-process world region
    pub fn anonymous(layout: WorldLayout, agent_count: usize) -> StoreResult<Self> {
        check_agent_count(agent_count)?;
        let region = SharedRegion::anonymous(layout.len())?;
        let world = Self { region, layout };
        world.init_header(agent_count);
        Ok(world)
    }

    fn init_header(&self, agent_count: usize) {
        let header = self.region.as_ptr() as *mut WorldHeader;
        // SAFETY: freshly created read-write mapping nobody else has attached yet
        unsafe {
            (*header).width = self.layout.width;
            (*header).height = self.layout.height;
            (*header).agent_count = agent_count as u32;
            (*header).agents = [AgentRecord::default(); MAX_AGENTS];
            (*header).finished = 0;
        }
    }

    fn header(&self) -> &WorldHeader {
        // SAFETY: the region is at least CELLS_OFFSET bytes and page aligned
        unsafe { &*(self.region.as_ptr() as *const WorldHeader) }
    }

    pub fn layout(&self) -> WorldLayout {
        self.layout
    }

    /// Name the region was mapped from
    pub fn name(&self) -> &str {
        self.region.label()
    }

    /// Read the world inside a read section
    pub fn read<'a>(&'a self, _section: &'a ReadSection<'_>) -> WorldRef<'a> {
        // SAFETY: cells start at CELLS_OFFSET and the layout sized the region for them
        let cells = unsafe {
            std::slice::from_raw_parts(
                self.region.as_ptr().add(WorldLayout::CELLS_OFFSET) as *const i32,
                self.layout.cells(),
            )
        };
        WorldRef {
            header: self.header(),
            cells,
        }
    }

    /// Mutate the world inside the exclusive write section
    pub fn write<'a>(&'a self, _section: &'a mut WriteSection<'_>) -> StoreResult<WorldMut<'a>> {
        if self.region.access() != Access::ReadWrite {
            return Err(StoreError::ReadOnly(self.name().to_string()));
        }
        let base = self.region.as_ptr();
        // SAFETY: the write section excludes every other reader and writer,
        // and the mutable borrow of the section prevents a second WorldMut
        let (header, cells) = unsafe {
            (
                &mut *(base as *mut WorldHeader),
                std::slice::from_raw_parts_mut(base.add(WorldLayout::CELLS_OFFSET) as *mut i32, self.layout.cells()),
            )
        };
        Ok(WorldMut { header, cells })
    }

    /// Unmap this process's view of the world
    pub fn release(self) {
        debug!(name = %self.name(), "SharedWorld::release: called");
    }
}

fn check_agent_count(agent_count: usize) -> StoreResult<()> {
    if agent_count > MAX_AGENTS {
        return Err(StoreError::TooManyAgents {
            count: agent_count,
            max: MAX_AGENTS,
        });
    }
    Ok(())
}

fn roster(header: &WorldHeader) -> &[AgentRecord] {
    let count = (header.agent_count as usize).min(MAX_AGENTS);
    &header.agents[..count]
}

/// Read-only view of the world
#[derive(Debug, Clone, Copy)]
pub struct WorldRef<'a> {
    header: &'a WorldHeader,
    cells: &'a [i32],
}

impl<'a> WorldRef<'a> {
    pub fn agents(&self) -> &'a [AgentRecord] {
        roster(self.header)
    }

    pub fn agent(&self, idx: usize) -> Option<&'a AgentRecord> {
        self.agents().get(idx)
    }

    pub fn finished(&self) -> bool {
        self.header.finished != 0
    }

    /// Roster slot owned by `pid`
    pub fn find_pid(&self, pid: i32) -> Option<usize> {
        self.agents().iter().position(|a| a.pid == pid)
    }

    /// Copy everything out so the section can be left early
    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            width: self.header.width,
            height: self.header.height,
            finished: self.finished(),
            agents: self.agents().to_vec(),
            cells: self.cells.to_vec(),
        }
    }
}

impl Board for WorldRef<'_> {
    fn width(&self) -> u16 {
        self.header.width
    }

    fn height(&self) -> u16 {
        self.header.height
    }

    fn cells(&self) -> &[i32] {
        self.cells
    }
}

/// Exclusive view of the world
#[derive(Debug)]
pub struct WorldMut<'a> {
    header: &'a mut WorldHeader,
    cells: &'a mut [i32],
}

impl WorldMut<'_> {
    pub fn agents(&self) -> &[AgentRecord] {
        roster(&*self.header)
    }

    pub fn agent(&self, idx: usize) -> Option<&AgentRecord> {
        self.agents().get(idx)
    }

    pub fn agent_mut(&mut self, idx: usize) -> Option<&mut AgentRecord> {
        let count = (self.header.agent_count as usize).min(MAX_AGENTS);
        self.header.agents[..count].get_mut(idx)
    }

    pub fn finished(&self) -> bool {
        self.header.finished != 0
    }

    /// Mark the game finished; there is no way back
    pub fn set_finished(&mut self) {
        self.header.finished = 1;
    }

    /// Write a cell; returns false (and writes nothing) outside the board
    pub fn set_cell(&mut self, x: i32, y: i32, value: i32) -> bool {
        if !self.in_bounds(x, y) {
            return false;
        }
        let idx = y as usize * self.header.width as usize + x as usize;
        self.cells[idx] = value;
        true
    }

    pub fn cells_mut(&mut self) -> &mut [i32] {
        &mut *self.cells
    }
}

impl Board for WorldMut<'_> {
    fn width(&self) -> u16 {
        self.header.width
    }

    fn height(&self) -> u16 {
        self.header.height
    }

    fn cells(&self) -> &[i32] {
        &*self.cells
    }
}

/// Owned copy of the world taken inside a read section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldSnapshot {
    pub width: u16,
    pub height: u16,
    pub finished: bool,
    pub agents: Vec<AgentRecord>,
    pub cells: Vec<i32>,
}

impl Board for WorldSnapshot {
    fn width(&self) -> u16 {
        self.width
    }

    fn height(&self) -> u16 {
        self.height
    }

    fn cells(&self) -> &[i32] {
        &self.cells
    }
}
