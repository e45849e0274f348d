//! 骨骼集合
//!
//! 管理骨骼层次结构，并在构建时一次性完成：
//! - 引用检查（父骨骼、附加父骨骼、IK 目标与链接）
//! - 依赖排序（父骨骼、附加父骨骼、IK 链先于依赖者；同层按 (物理后, 层级, 索引) 优先）
//! - 子骨骼缓存与名称索引

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::{MmdError, Result};

use super::bone_link::BoneLink;

/// 求值阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    /// 物理前
    BeforePhysics,
    /// 物理后
    AfterPhysics,
}

/// 骨骼集合
#[derive(Clone, Debug)]
pub struct BoneSet {
    bones: Vec<BoneLink>,
    name_to_index: HashMap<String, usize>,
    /// 子骨骼缓存
    children: Vec<Vec<usize>>,
    /// 依赖顺序
    order: Vec<usize>,
    /// 每个骨骼所在阶段
    phases: Vec<Phase>,
    /// 每个骨骼直接依赖的骨骼
    dependencies: Vec<Vec<usize>>,
}

impl BoneSet {
    /// 构建并校验
    pub fn new(bones: Vec<BoneLink>) -> Result<Self> {
        let count = bones.len();
        let in_range = |i: i32| i >= 0 && (i as usize) < count;

        let mut name_to_index = HashMap::with_capacity(count);
        for (i, bone) in bones.iter().enumerate() {
            if bone.index != i {
                return Err(MmdError::Validation(format!(
                    "Bone '{}' has index {} but is stored at {}",
                    bone.name, bone.index, i
                )));
            }
            if !bone.position.is_finite() {
                return Err(MmdError::Validation(format!(
                    "Bone '{}' has a non-finite rest position",
                    bone.name
                )));
            }
            if bone.parent_index >= 0 && !in_range(bone.parent_index) {
                return Err(MmdError::Validation(format!(
                    "Bone '{}' references missing parent {}",
                    bone.name, bone.parent_index
                )));
            }
            if let Some(append) = &bone.append {
                if append.parent >= 0 && !in_range(append.parent) {
                    return Err(MmdError::Validation(format!(
                        "Bone '{}' references missing append parent {}",
                        bone.name, append.parent
                    )));
                }
            }
            if let Some(ik) = &bone.ik {
                if !in_range(ik.target_bone) {
                    return Err(MmdError::Validation(format!(
                        "IK bone '{}' references missing target {}",
                        bone.name, ik.target_bone
                    )));
                }
                if let Some(link) = ik.links.iter().find(|l| !in_range(l.bone_index)) {
                    return Err(MmdError::Validation(format!(
                        "IK bone '{}' references missing link {}",
                        bone.name, link.bone_index
                    )));
                }
            }
            // 同名骨骼保留第一个
            name_to_index.entry(bone.name.clone()).or_insert(i);
        }

        let mut children = vec![Vec::new(); count];
        let mut dependencies = vec![Vec::new(); count];
        for bone in &bones {
            let deps = &mut dependencies[bone.index];
            if let Some(parent) = bone.parent_id() {
                children[parent].push(bone.index);
                deps.push(parent);
            }
            if let Some(append) = bone.append_parent_id() {
                if append != bone.index {
                    deps.push(append);
                }
            }
            if let Some(ik) = &bone.ik {
                deps.push(ik.target_bone as usize);
                deps.extend(ik.links.iter().map(|l| l.bone_index as usize));
            }
            deps.sort_unstable();
            deps.dedup();
            deps.retain(|&d| d != bone.index);
        }

        let order = Self::sort_by_dependency(&bones, &dependencies)?;

        // 依赖物理后骨骼的骨骼同样放到物理后
        let mut phases = vec![Phase::BeforePhysics; count];
        for &i in &order {
            let after = bones[i].deform_after_physics()
                || dependencies[i].iter().any(|&d| phases[d] == Phase::AfterPhysics);
            if after {
                phases[i] = Phase::AfterPhysics;
            }
        }

        log::debug!("BoneSet 构建完成: {} 个骨骼", count);

        Ok(Self {
            bones,
            name_to_index,
            children,
            order,
            phases,
            dependencies,
        })
    }

    /// 带优先级的拓扑排序，检测环
    fn sort_by_dependency(bones: &[BoneLink], dependencies: &[Vec<usize>]) -> Result<Vec<usize>> {
        let count = bones.len();
        let mut pending = vec![0usize; count];
        let mut dependents = vec![Vec::new(); count];
        for (i, deps) in dependencies.iter().enumerate() {
            pending[i] = deps.len();
            for &d in deps {
                dependents[d].push(i);
            }
        }

        let key = |i: usize| Reverse((bones[i].deform_after_physics(), bones[i].layer, i));
        let mut ready: BinaryHeap<_> = (0..count).filter(|&i| pending[i] == 0).map(key).collect();
        let mut order = Vec::with_capacity(count);

        while let Some(Reverse((_, _, i))) = ready.pop() {
            order.push(i);
            for &next in &dependents[i] {
                pending[next] -= 1;
                if pending[next] == 0 {
                    ready.push(key(next));
                }
            }
        }

        if order.len() != count {
            let stuck: Vec<&str> = (0..count)
                .filter(|&i| pending[i] > 0)
                .map(|i| bones[i].name.as_str())
                .collect();
            return Err(MmdError::Validation(format!(
                "Cyclic bone dependency among: {}",
                stuck.join(", ")
            )));
        }
        Ok(order)
    }

    // ========================================
    // 访问器
    // ========================================

    #[inline]
    pub fn len(&self) -> usize {
        self.bones.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&BoneLink> {
        self.bones.get(index)
    }

    #[inline]
    pub fn bones(&self) -> &[BoneLink] {
        &self.bones
    }

    pub fn iter(&self) -> impl Iterator<Item = &BoneLink> {
        self.bones.iter()
    }

    /// 根据名称查找骨骼
    #[inline]
    pub fn find_bone_by_name(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    #[inline]
    pub fn children(&self, index: usize) -> &[usize] {
        &self.children[index]
    }

    /// 依赖顺序
    #[inline]
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    #[inline]
    pub fn phase(&self, index: usize) -> Phase {
        self.phases[index]
    }

    /// 指定阶段的求值顺序
    pub fn phase_order(&self, phase: Phase) -> impl Iterator<Item = usize> + '_ {
        self.order.iter().copied().filter(move |&i| self.phases[i] == phase)
    }

    #[inline]
    pub fn dependencies(&self, index: usize) -> &[usize] {
        &self.dependencies[index]
    }

    /// 计算需要求值的骨骼集合
    ///
    /// 包含请求的骨骼及其全部依赖；启用 IK 时，链接涉及已选骨骼的 IK 骨骼也会加入。
    pub fn dependency_closure<S: AsRef<str>>(&self, names: &[S], include_ik: bool) -> Vec<bool> {
        let mut selected = vec![false; self.len()];
        let mut stack: Vec<usize> = names
            .iter()
            .filter_map(|n| self.find_bone_by_name(n.as_ref()))
            .collect();

        loop {
            while let Some(i) = stack.pop() {
                if selected[i] {
                    continue;
                }
                selected[i] = true;
                stack.extend(self.dependencies[i].iter().copied().filter(|&d| !selected[d]));
            }

            if !include_ik {
                break;
            }
            // IK 骨骼会修改链接骨骼，需要一并求值
            for bone in &self.bones {
                if selected[bone.index] {
                    continue;
                }
                if let Some(ik) = &bone.ik {
                    let touches = ik
                        .links
                        .iter()
                        .any(|l| selected[l.bone_index as usize])
                        || selected[ik.target_bone as usize];
                    if touches {
                        stack.push(bone.index);
                    }
                }
            }
            if stack.is_empty() {
                break;
            }
        }
        selected
    }

    /// 已求值骨骼中 `index` 的后代（按依赖顺序）
    pub fn descendants(&self, index: usize) -> Vec<usize> {
        let mut result = Vec::new();
        let mut stack = self.children[index].clone();
        while let Some(i) = stack.pop() {
            result.push(i);
            stack.extend_from_slice(&self.children[i]);
        }
        result
    }
}
