use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::availability::{slot_instant, DayAvailability};
use crate::error::{EngineError, EngineResult};

/// Минимальный блок: три слота подряд, то есть два часа.
pub const MIN_BLOCK_SLOTS: usize = 3;
pub const MIN_SPAN_HOURS: u8 = 2;

/// Непрерывная серия часов, обе границы включительно.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub first: u8,
    pub last: u8,
}

impl Run {
    /// Длительность в часах: слоты обозначают начала часов.
    pub fn span(&self) -> u8 {
        self.last - self.first
    }

    pub fn slots(&self) -> usize {
        usize::from(self.last - self.first) + 1
    }

    pub fn window(&self, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        (slot_instant(date, self.first), slot_instant(date, self.last))
    }
}

/// Выбранные часы одной даты.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSet(BTreeSet<u8>);

impl RunSet {
    pub fn new() -> Self {
        RunSet(BTreeSet::new())
    }

    pub fn from_hours<I: IntoIterator<Item = u8>>(hours: I) -> Self {
        RunSet(hours.into_iter().collect())
    }

    pub fn hours(&self) -> impl Iterator<Item = u8> + '_ {
        self.0.iter().copied()
    }

    pub fn contains(&self, hour: u8) -> bool {
        self.0.contains(&hour)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn runs(&self) -> Vec<Run> {
        let mut runs: Vec<Run> = Vec::new();
        for hour in self.hours() {
            match runs.last_mut() {
                Some(run) if run.last + 1 == hour => run.last = hour,
                _ => runs.push(Run {
                    first: hour,
                    last: hour,
                }),
            }
        }
        runs
    }

    pub fn span(&self) -> u32 {
        self.runs().iter().map(|r| u32::from(r.span())).sum()
    }

    fn with(&self, hours: impl IntoIterator<Item = u8>) -> Self {
        let mut next = self.clone();
        next.0.extend(hours);
        next
    }

    fn without(&self, hour: u8) -> Self {
        let mut next = self.clone();
        next.0.remove(&hour);
        next
    }
}

/// Выбор клиента по датам. Хранится вызывающей стороной между запросами.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    dates: BTreeMap<NaiveDate, RunSet>,
}

impl Selection {
    pub fn new() -> Self {
        Selection::default()
    }

    pub fn get(&self, date: NaiveDate) -> Option<&RunSet> {
        self.dates.get(&date)
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.dates.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.values().all(RunSet::is_empty)
    }

    /// Все серии по всем датам, по возрастанию времени.
    pub fn runs(&self) -> Vec<(NaiveDate, Run)> {
        self.dates
            .iter()
            .flat_map(|(date, set)| set.runs().into_iter().map(move |run| (*date, run)))
            .collect()
    }

    pub fn total_span(&self) -> u32 {
        self.dates.values().map(RunSet::span).sum()
    }

    pub(crate) fn set_date(&mut self, date: NaiveDate, hours: RunSet) {
        if hours.is_empty() {
            self.dates.remove(&date);
        } else {
            self.dates.insert(date, hours);
        }
    }

    fn replaced(&self, date: NaiveDate, hours: RunSet) -> Self {
        let mut next = self.clone();
        next.set_date(date, hours);
        next
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionEvent {
    Add(u8),
    Remove(u8),
    Clear,
}

pub fn apply(
    selection: &Selection,
    day: &DayAvailability,
    event: SelectionEvent,
) -> EngineResult<Selection> {
    match event {
        SelectionEvent::Add(hour) => select_hour(selection, day, hour),
        SelectionEvent::Remove(hour) => deselect_hour(selection, day.date, hour),
        SelectionEvent::Clear => Ok(clear_date(selection, day.date)),
    }
}

fn block_from(hour: u8) -> Option<Vec<u8>> {
    let last = hour.checked_add(MIN_SPAN_HOURS)?;
    if last > 23 {
        return None;
    }
    Some((hour..=last).collect())
}

fn take_block(
    selection: &Selection,
    current: &RunSet,
    day: &DayAvailability,
    hour: u8,
) -> EngineResult<Selection> {
    let block = block_from(hour).ok_or(EngineError::InsufficientAvailability { hour })?;
    if !block.iter().all(|&h| day.is_available(h)) {
        return Err(EngineError::InsufficientAvailability { hour });
    }
    Ok(selection.replaced(day.date, current.with(block)))
}

/// Добавить час к выбору на дату `day.date`.
///
/// Пустая дата сразу получает блок из трёх слотов. Дальше час принимается,
/// только если продолжает существующую серию с любого края, либо начинает
/// новый блок не ближе двух часов к остальным сериям.
pub fn select_hour(selection: &Selection, day: &DayAvailability, hour: u8) -> EngineResult<Selection> {
    let current = selection.get(day.date).cloned().unwrap_or_default();
    if current.contains(hour) {
        return Ok(selection.clone());
    }

    if current.is_empty() {
        return take_block(selection, &current, day, hour);
    }

    let runs = current.runs();
    let extends = runs
        .iter()
        .any(|run| u16::from(hour) + 1 == u16::from(run.first) || hour == run.last + 1);

    if extends {
        if !day.is_scheduled(hour) {
            return Err(EngineError::ScheduleUnavailable {
                date: day.date,
                hour,
            });
        }
        if !day.is_available(hour) {
            return Err(EngineError::OverlapDetected);
        }
        return Ok(selection.replaced(day.date, current.with([hour])));
    }

    let block_last = u16::from(hour) + u16::from(MIN_SPAN_HOURS);
    let separated = runs.iter().all(|run| {
        u16::from(hour) >= u16::from(run.last) + 2 || u16::from(run.first) >= block_last + 2
    });
    if separated {
        return take_block(selection, &current, day, hour);
    }

    Err(EngineError::NonContiguousSelection { hour })
}

/// Убрать час. Отказ, если любая оставшаяся серия станет короче двух часов.
pub fn deselect_hour(selection: &Selection, date: NaiveDate, hour: u8) -> EngineResult<Selection> {
    let current = match selection.get(date) {
        Some(set) if set.contains(hour) => set,
        _ => return Ok(selection.clone()),
    };

    let remaining = current.without(hour);
    if remaining.runs().iter().any(|run| run.slots() < MIN_BLOCK_SLOTS) {
        return Err(EngineError::BelowMinimumDuration);
    }

    Ok(selection.replaced(date, remaining))
}

/// Сбросить дату целиком.
pub fn clear_date(selection: &Selection, date: NaiveDate) -> Selection {
    selection.replaced(date, RunSet::new())
}

/// Серии, из которых будут созданы брони. Хотя бы одна должна длиться не меньше двух часов.
pub fn bookable_runs(selection: &Selection) -> EngineResult<Vec<(NaiveDate, Run)>> {
    let runs: Vec<(NaiveDate, Run)> = selection
        .runs()
        .into_iter()
        .filter(|(_, run)| run.span() >= MIN_SPAN_HOURS)
        .collect();

    if runs.is_empty() {
        return Err(EngineError::BelowMinimumDuration);
    }
    Ok(runs)
}

pub fn parse_hour(label: &str) -> Option<u8> {
    let hours = label.trim().split(':').next()?;
    let hour: u8 = hours.parse().ok()?;
    (hour <= 23).then_some(hour)
}

pub fn hour_label(hour: u8) -> String {
    format!("{:02}:00", hour)
}
